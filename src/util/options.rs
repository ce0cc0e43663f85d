//! Runtime options.
//!
//! Every option has a default, and can be overridden by an environment variable with the
//! `G1_` prefix (for example `G1_UPDATE_BUFFER_SIZE=512`), or by the VM through
//! [`Options::process`] / [`Options::process_bulk`] before the [`crate::HeapCore`] is built.
//! Options are read-only once the heap core exists.

use crate::util::constants::*;
use crate::util::log;
use std::default::Default;
use std::fmt;
use std::str::FromStr;

/// A zone threshold (or a threshold step) for concurrent refinement.
///
/// `auto` picks an ergonomic value from the number of GC threads, see
/// [`crate::plan::g1::concurrent_refine::ConcurrentRefine`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ZoneSetting {
    Ergonomic,
    Cards(usize),
}

impl ZoneSetting {
    /// The configured value, or `ergonomic` if none was given.
    pub fn or_ergonomic(self, ergonomic: usize) -> usize {
        match self {
            ZoneSetting::Ergonomic => ergonomic,
            ZoneSetting::Cards(n) => n,
        }
    }

    pub fn is_ergonomic(self) -> bool {
        matches!(self, ZoneSetting::Ergonomic)
    }
}

impl FromStr for ZoneSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto" | "ergonomic" => Ok(ZoneSetting::Ergonomic),
            n => n
                .parse::<usize>()
                .map(ZoneSetting::Cards)
                .map_err(|e| format!("Expected 'auto' or a number of buffers: {}", e)),
        }
    }
}

impl fmt::Display for ZoneSetting {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ZoneSetting::Ergonomic => write!(f, "auto"),
            ZoneSetting::Cards(n) => write!(f, "{}", n),
        }
    }
}

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_percentage(v: &usize) -> bool {
    *v <= 100
}

fn is_valid_card_size(v: &usize) -> bool {
    v.is_power_of_two() && (MIN_BYTES_IN_CARD..=MAX_BYTES_IN_CARD).contains(v)
}

fn is_valid_region_size(v: &usize) -> bool {
    v.is_power_of_two() && *v >= BYTES_IN_MBYTE && *v <= 32 * BYTES_IN_MBYTE
}

const ENV_PREFIX: &str = "G1_";

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }
        impl Options {
            /// Set an option from its string value. Returns false if the value cannot be
            /// parsed or is invalid, in which case the option keeps its current value.
            /// Panics if `s` does not name an option.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            log::warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        log::warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }

            /// Is `s` the name of an option?
            pub fn is_option(s: &str) -> bool {
                matches!(s, $(stringify!($name))|*)
            }

            /// Options with their built-in defaults, ignoring the environment.
            pub fn without_env() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Self::without_env();

                // If we have env vars that start with G1_ and match any option (such as G1_UPDATE_BUFFER_SIZE),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    /// Number of parallel GC workers used during a pause.
    threads:                               usize       [|v: &usize| *v > 0] = num_cpus::get(),
    /// Number of concurrent refinement threads. Zero disables concurrent refinement; mutators
    /// then process their own buffers once the red zone is reached.
    refinement_thread_count:               usize       [always_valid] = num_cpus::get(),
    /// Completed buffers below which no refinement thread runs.
    green_zone:                            ZoneSetting [always_valid] = ZoneSetting::Ergonomic,
    /// Completed buffers at which all refinement threads run.
    yellow_zone:                           ZoneSetting [always_valid] = ZoneSetting::Ergonomic,
    /// Completed buffers at which mutators process buffers themselves.
    red_zone:                              ZoneSetting [always_valid] = ZoneSetting::Ergonomic,
    /// Extra completed buffers needed to activate each additional refinement thread.
    refinement_threshold_step:             ZoneSetting [always_valid] = ZoneSetting::Ergonomic,
    /// The last refinement thread wakes up this often to flush the shared queue.
    refinement_service_interval_ms:        u64         [always_valid] = 300,
    /// Adjust the zones after every pause from the time spent updating remembered sets.
    use_adaptive_refinement:               bool        [always_valid] = true,
    /// Pause time budget for updating remembered sets, used by adaptive refinement.
    update_rs_pause_goal_ms:               u64         [|v: &u64| *v > 0] = 20,
    /// Number of cards in a dirty card buffer.
    update_buffer_size:                    usize       [|v: &usize| *v > 0] = 256,
    /// Defer the refinement of frequently dirtied cards.
    use_hot_card_cache:                    bool        [always_valid] = true,
    /// A cache slot that evicts more cards than this asks the cache to grow.
    hot_card_cache_expand_threshold:       u8          [|v: &u8| *v > 0] = 16,
    /// The largest hot card cache, as a percentage of the number of cards in the heap.
    max_hot_card_count_size_percent:       usize       [is_percentage] = 25,
    /// Bytes in a card. Must be a power of two.
    card_size:                             usize       [is_valid_card_size] = DEFAULT_BYTES_IN_CARD,
    /// Bytes in a region. Must be a power of two between 1MB and 32MB.
    region_size:                           usize       [is_valid_region_size] = DEFAULT_BYTES_IN_REGION,
    /// Fine-grain tables per remembered set, per megabyte of region.
    rset_region_entries_base:              usize       [|v: &usize| *v > 0] = 256,
    /// Sparse entries per source region, per megabyte of region.
    rset_sparse_region_entries_base:       usize       [|v: &usize| *v > 0] = 4,
    /// Cards claimed at a time while scanning a remembered set.
    rset_scan_block_size:                  usize       [|v: &usize| *v > 0] = 64,
    /// Remove remembered set entries from dead regions and cards during cleanup.
    rset_scrub:                            bool        [always_valid] = true,
    /// After a failed evacuation, hand the cards into the collection set back to refinement
    /// instead of rescanning them at the end of the pause.
    deferred_rs_update:                    bool        [always_valid] = true,
    /// Number of entries in an SATB buffer.
    satb_buffer_size:                      usize       [|v: &usize| *v > 0] = BYTES_IN_KBYTE,
    /// Completed SATB buffers at which the marker is asked to drain them.
    satb_process_completed_threshold:      usize       [always_valid] = 20,
    /// A filtered SATB buffer is only enqueued if more than this percentage of it survives.
    /// Zero disables filtering.
    satb_buffer_enqueueing_threshold_percent: usize    [is_percentage] = 60,
    /// How many times remark may restart marking after a mark stack overflow before the
    /// cycle is abandoned.
    max_mark_restarts:                     usize       [always_valid] = 32,
}

impl Options {
    /// Process one option. `name` is the option name in snake case.
    /// Returns false if the option is unknown or its value is invalid.
    pub fn process(&mut self, name: &str, value: &str) -> bool {
        if !Self::is_option(name) {
            log::warn!("Unknown option {}", name);
            return false;
        }
        self.set_from_str(name, value)
    }

    /// Process whitespace separated `name=value` pairs. Returns false if any pair is rejected.
    pub fn process_bulk(&mut self, options: &str) -> bool {
        options.split_ascii_whitespace().all(|pair| {
            let mut kv = pair.splitn(2, '=');
            match (kv.next(), kv.next()) {
                (Some(name), Some(value)) => self.process(name, value),
                _ => {
                    log::warn!("Option '{}' is not in the form of name=value", pair);
                    false
                }
            }
        })
    }

    /// log2 of the card size.
    pub fn log_card_size(&self) -> usize {
        self.card_size.trailing_zeros() as usize
    }

    /// log2 of the region size.
    pub fn log_region_size(&self) -> usize {
        self.region_size.trailing_zeros() as usize
    }
}
