use std::process::Command;

fn main() {
    println!("cargo:rustc-env=VERSION={}", env!("CARGO_PKG_VERSION"));

    // Prefer an explicit GIT_SHA (CI), then git itself, then "dev"
    let git_sha = std::env::var("GIT_SHA").ok().or_else(|| {
        Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .map(|s| s.trim().to_string())
    });
    println!(
        "cargo:rustc-env=SHA={}",
        git_sha.unwrap_or_else(|| "dev".to_string())
    );

    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-env-changed=GIT_SHA");
}
