use pkgboot_common::env_vars;
use pkgboot_launcher::{ArchiveProbe, LaunchContext, Launcher, Payload, Supervisor};
use std::env;
use std::process::Command;
use std::thread;
use std::time::Duration;

const EXIT_CODE_VAR: &str = "PKGBOOT_TEST_EXIT_CODE";
const SLEEP_MS_VAR: &str = "PKGBOOT_TEST_SLEEP_MS";
const RAISE_TERM_VAR: &str = "PKGBOOT_TEST_RAISE_TERM";
const RERAISE_VAR: &str = "PKGBOOT_TEST_RERAISE";
const NESTED_VAR: &str = "PKGBOOT_TEST_NESTED";

fn echo_payload(ctx: &LaunchContext) -> anyhow::Result<i32> {
    let args: Vec<String> = env::args().skip(1).collect();
    println!("child: {}", args.join(" "));

    if env::var_os(NESTED_VAR).is_some() {
        let status = Command::new("sh")
            .args(["-c", "echo \"nested marker: ${PKGBOOT_CHILD:-unset}\""])
            .status()?;
        anyhow::ensure!(status.success(), "nested command failed");
        println!("own marker: {}", env::var(env_vars::CHILD).unwrap_or_else(|_| "unset".into()));
    }

    if let Some(ms) = env::var(SLEEP_MS_VAR).ok().and_then(|ms| ms.parse().ok()) {
        thread::sleep(Duration::from_millis(ms));
    }

    #[cfg(unix)]
    {
        if env::var_os(RAISE_TERM_VAR).is_some() {
            nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM)?;
        }
    }

    match env::var(EXIT_CODE_VAR) {
        Ok(code) => Ok(code.trim().parse()?),
        Err(_) => ArchiveProbe.run(ctx),
    }
}

fn main() {
    pkgboot_launcher::logging::init();
    let supervisor = Supervisor::new().reraise_signals(env::var_os(RERAISE_VAR).is_some());
    let code = Launcher::new(echo_payload)
        .with_supervisor(supervisor)
        .run();
    std::process::exit(code);
}
