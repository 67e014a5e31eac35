//! Build identity for muninn's startup log line.
//!
//! The CLI logs `version_string()` next to the endpoint and model when it
//! starts, so a bug report pasted from the log pins the exact build.

/// Crate version.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Branch muninn was built from; "unknown" when built from a tarball.
pub const GIT_BRANCH: &str = match option_env!("VERGEN_GIT_BRANCH") {
    Some(branch) => branch,
    None => "unknown",
};

/// Commit muninn was built from; "unknown" when built from a tarball.
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// Characters of the commit SHA kept in [`version_string`].
const SHORT_SHA_LEN: usize = 7;

/// Whether the build included local modifications.
pub fn git_dirty() -> bool {
    option_env!("VERGEN_GIT_DIRTY") == Some("true")
}

/// `0.1.0+main.abc1234`, or `0.1.0+main.abc1234.dirty` for a modified tree.
pub fn version_string() -> String {
    let sha = GIT_SHA.get(..SHORT_SHA_LEN).unwrap_or(GIT_SHA);
    let dirty = if git_dirty() { ".dirty" } else { "" };
    format!("{PKG_VERSION}+{GIT_BRANCH}.{sha}{dirty}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_metadata_follows_the_plus() {
        let version = version_string();
        let (release, build) = version.split_once('+').unwrap();
        assert_eq!(release, PKG_VERSION);
        assert!(build.starts_with(GIT_BRANCH));
    }

    #[test]
    fn sha_is_shortened() {
        let version = version_string();
        let build = version.trim_end_matches(".dirty");
        let sha = build.rsplit('.').next().unwrap();
        assert!(sha.len() <= SHORT_SHA_LEN);
    }

    #[test]
    fn dirty_builds_are_marked() {
        assert_eq!(version_string().ends_with(".dirty"), git_dirty());
    }
}
