use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    embuild::espidf::sysenv::output();

    // Expose full git version (e.g. "v0.1.0" or "v0.1.0-3-gabcdef")
    let git_version = Command::new("git")
        .args(["describe", "--tags", "--always"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .unwrap_or_else(|| env::var("CARGO_PKG_VERSION").unwrap());
    println!("cargo:rustc-env=GIT_VERSION={}", git_version.trim());
    // Rebuild when HEAD moves or tags change
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs/tags");

    // Embed the update server's CA certificate. CA_CERT_PATH overrides the
    // default location; a missing file embeds an empty blob.
    println!("cargo:rerun-if-env-changed=CA_CERT_PATH");
    let cert_path = env::var_os("CA_CERT_PATH")
        .map_or_else(|| PathBuf::from("certs/ca.crt"), PathBuf::from);
    println!("cargo:rerun-if-changed={}", cert_path.display());

    let cert = fs::read(&cert_path).unwrap_or_else(|_| {
        println!(
            "cargo:warning=No CA certificate at {}, building without one",
            cert_path.display()
        );
        Vec::new()
    });

    let out_dir = env::var("OUT_DIR").unwrap();
    fs::write(Path::new(&out_dir).join("ca.crt"), cert).expect("Failed to write ca.crt");
}
