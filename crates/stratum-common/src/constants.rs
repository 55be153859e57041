//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for Stratum data when no home directory is usable.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/stratum";

/// Returns the data directory, preferring `$HOME/.stratum` and
/// falling back to `/var/lib/stratum`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".stratum");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Environment variable that overrides the data directory in the CLI.
pub const DATA_DIR_ENV: &str = "STRATUM_DATA_DIR";

/// Default recipe file name looked up by `strat build`.
pub const DEFAULT_RECIPE_FILE: &str = "Stratumfile";

/// Name of the optional configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Subdirectory of the data directory holding the layer cache.
pub const CACHE_DIR_NAME: &str = "cache";

/// Subdirectory of the data directory holding the image catalog.
pub const IMAGES_DIR_NAME: &str = "images";

/// Working directory of an image before any `WORKDIR` step.
pub const DEFAULT_WORKDIR: &str = "/";

/// `PATH` handed to commands when the recipe sets none.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Interpreter prefix for shell-form `RUN` and `ENTRYPOINT`.
pub const SHELL: [&str; 2] = ["/bin/sh", "-c"];

/// Environment variable exposing the rootfs path to host-executed commands.
pub const ROOTFS_ENV: &str = "STRATUM_ROOTFS";

/// Salt mixed into every layer cache key. Bump to invalidate all caches.
pub const CACHE_KEY_VERSION: &str = "stratum.layer.v1";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers in an image.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// Prefix marking a deleted path inside a layer archive.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "strat";
