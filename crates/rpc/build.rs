use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=GIT_COMMIT_HASH");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
    println!("cargo:rerun-if-changed=../../.git/HEAD");

    for var in ["GIT_COMMIT_HASH", "GITHUB_SHA"] {
        if let Some(sha) = std::env::var(var).ok().filter(|sha| !sha.trim().is_empty()) {
            println!("cargo:rustc-env=GIT_COMMIT_HASH={}", sha.trim());
            return;
        }
    }

    let Ok(output) = Command::new("git").args(["rev-parse", "HEAD"]).output() else {
        return;
    };
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() && !sha.is_empty() {
        println!("cargo:rustc-env=GIT_COMMIT_HASH={sha}");
    }
}
