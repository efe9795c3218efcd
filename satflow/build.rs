use std::env;
use std::fmt;
use std::process::Command;

/// Build metadata embedded into the binary as `SATFLOW_VERSION_INFO`.
#[derive(Debug, Clone)]
struct BuildInfo {
    version: String,
    build_date: String,
    git_commit: String,
    git_tree_state: String,
    rust_version: String,
    platform: String,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Version: {}, BuildDate: {}, GitCommit: {}, GitTreeState: {}, RustVersion: {}, Platform: {}",
            self.version,
            self.build_date,
            self.git_commit,
            self.git_tree_state,
            self.rust_version,
            self.platform
        )
    }
}

/// Runs a command and returns its trimmed stdout, `None` if it could not run or failed.
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

/// Container builds pass the metadata through the environment, local builds ask git.
fn from_env_or(var: &str, fallback: impl FnOnce() -> Option<String>) -> String {
    env::var(var)
        .ok()
        .or_else(fallback)
        .unwrap_or_default()
}

fn build_info() -> BuildInfo {
    let git_commit = from_env_or("GIT_COMMIT", || command_output("git", &["rev-parse", "HEAD"]));
    let git_tag = from_env_or("GIT_TAG", || {
        command_output("git", &["describe", "--exact-match", "--tags", "HEAD"])
    });
    let git_tree_state = from_env_or("GIT_TREE_STATE", || {
        command_output("git", &["status", "--porcelain"]).map(|status| {
            if status.is_empty() {
                "clean".to_string()
            } else {
                "dirty".to_string()
            }
        })
    });

    // a tagged commit on a clean tree is a release, anything else gets a dev suffix
    let version = if !git_tag.is_empty() && git_tree_state == "clean" {
        git_tag
    } else {
        let mut version = env::var("VERSION").unwrap_or_else(|_| "latest".to_string());
        match git_commit.get(0..7) {
            Some(short) => {
                version.push('+');
                version.push_str(short);
                if git_tree_state != "clean" {
                    version.push_str(".dirty");
                }
            }
            None => version.push_str("+unknown"),
        }
        version
    };

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let platform = format!(
        "{}/{}",
        env::var("CARGO_CFG_TARGET_OS").unwrap_or_default(),
        env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default()
    );

    BuildInfo {
        version,
        build_date: env::var("BUILD_DATE").unwrap_or_else(|_| chrono::Utc::now().to_rfc3339()),
        git_commit,
        git_tree_state,
        rust_version: command_output(&rustc, &["--version"]).unwrap_or_default(),
        platform,
    }
}

fn main() {
    println!("cargo:rerun-if-env-changed=VERSION");
    println!("cargo:rerun-if-env-changed=GIT_COMMIT");
    println!("cargo:rustc-env=SATFLOW_VERSION_INFO={}", build_info());
}
