// Tests that drive a whole `HeapCore` over the mock VM in `crate::util::test_util::mock_vm`.
//
// Every test builds its own heap, so tests can run in parallel. Tests that start the
// background threads use `serial_test` and must call `HeapCore::stop`.

mod mock_tests;
