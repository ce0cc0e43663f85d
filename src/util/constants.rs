/// log2 of the number of bytes in a byte
pub const LOG_BYTES_IN_BYTE: u8 = 0;
/// The number of bytes in a byte
pub const BYTES_IN_BYTE: usize = 1;
/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;
/// log2 of the number of bits in an address
pub const LOG_BITS_IN_ADDRESS: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_ADDRESS as usize;
/// The number of bits in an address
pub const BITS_IN_ADDRESS: usize = 1 << LOG_BITS_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the default card size (512 bytes)
pub const LOG_DEFAULT_BYTES_IN_CARD: u8 = 9;
/// The default number of bytes in a card
pub const DEFAULT_BYTES_IN_CARD: usize = 1 << LOG_DEFAULT_BYTES_IN_CARD;

/// log2 of the default region size (1 MB)
pub const LOG_DEFAULT_BYTES_IN_REGION: u8 = LOG_BYTES_IN_MBYTE;
/// The default number of bytes in a region
pub const DEFAULT_BYTES_IN_REGION: usize = 1 << LOG_DEFAULT_BYTES_IN_REGION;

/// The smallest card we support. A card must hold at least one reference slot.
pub const MIN_BYTES_IN_CARD: usize = BYTES_IN_WORD;
/// The largest card we support. Card offsets inside a region are stored as `u32` in sparse tables,
/// and regions are at most a few hundred megabytes, so this is far from any limit.
pub const MAX_BYTES_IN_CARD: usize = 64 * BYTES_IN_KBYTE;

static_assertions::const_assert!(DEFAULT_BYTES_IN_CARD.is_power_of_two());
static_assertions::const_assert!(MIN_BYTES_IN_CARD <= DEFAULT_BYTES_IN_CARD);
static_assertions::const_assert!(DEFAULT_BYTES_IN_CARD <= MAX_BYTES_IN_CARD);
static_assertions::const_assert!(DEFAULT_BYTES_IN_REGION % DEFAULT_BYTES_IN_CARD == 0);
