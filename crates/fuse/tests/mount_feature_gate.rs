//! Emit a warning when kernel mount tests are skipped.
//!
//! `mount_integration.rs` is gated behind `#[cfg(feature = "fuse")]`. This
//! companion makes the missing coverage visible when testing without it.

#[cfg(not(feature = "fuse"))]
#[test]
fn fuse_tests_skipped_warning() {
    eprintln!(
        "\n\x1b[33mwarning\x1b[0m: Skipping FUSE mount tests: built without `fuse` feature.\n\
         To run them, build with: cargo test --features fuse\n"
    );
}
