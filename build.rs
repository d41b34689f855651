use std::process::Command;

/// Прокидывает в сборку короткий хеш коммита и время сборки для баннера
/// `topicbus-cli --version`.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=TOPICBUS_BUILD_COMMIT");

    let commit = std::env::var("TOPICBUS_BUILD_COMMIT")
        .ok()
        .or_else(git_short_hash)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=TOPICBUS_GIT_COMMIT={commit}");

    let built_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    println!("cargo:rustc-env=TOPICBUS_BUILD_TIME={built_at}");
}

fn git_short_hash() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}
