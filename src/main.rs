//! pkgboot - bootloader for packaged executables
//!
//! Sets up the activation context for bundled libraries and runs the packaged
//! program in a supervised copy of this executable.

use pkgboot_launcher::{logging, ArchiveProbe, Launcher};

fn main() {
    logging::init();
    let code = Launcher::new(ArchiveProbe).run();
    std::process::exit(code);
}
