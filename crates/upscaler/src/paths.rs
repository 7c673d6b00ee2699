use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// How host paths map onto the path view of the external tools.
///
/// `Wsl` covers running under WSL while invoking the Windows builds of the
/// tools: `/mnt/c/Videos/a.mkv` is handed over as `C:\Videos\a.mkv`, and any
/// other Linux path goes through the `\\wsl.localhost\<distro>` share.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum PathTranslation {
    #[default]
    Native,
    Wsl {
        #[serde(default)]
        distro: Option<String>,
    },
}

impl PathTranslation {
    /// Render a host path the way the tool expects it
    pub fn to_tool(&self, path: &Path) -> String {
        let host = path.to_string_lossy();
        match self {
            PathTranslation::Native => host.into_owned(),
            PathTranslation::Wsl { distro } => {
                if let Some((drive, rest)) = split_mount(&host) {
                    let rest = rest.trim_start_matches('/').replace('/', "\\");
                    return format!("{}:\\{}", drive.to_ascii_uppercase(), rest);
                }
                match distro {
                    Some(distro) if host.starts_with('/') => {
                        format!("\\\\wsl.localhost\\{}{}", distro, host.replace('/', "\\"))
                    }
                    _ => host.into_owned(),
                }
            }
        }
    }

    /// Map a path written in the tool's view back onto the host
    pub fn to_host(&self, tool_path: &str) -> PathBuf {
        match self {
            PathTranslation::Native => PathBuf::from(tool_path),
            PathTranslation::Wsl { .. } => {
                let bytes = tool_path.as_bytes();
                if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
                    let drive = (bytes[0] as char).to_ascii_lowercase();
                    let rest = tool_path[2..].replace('\\', "/");
                    let rest = rest.trim_start_matches('/');
                    return if rest.is_empty() {
                        PathBuf::from(format!("/mnt/{}", drive))
                    } else {
                        PathBuf::from(format!("/mnt/{}/{}", drive, rest))
                    };
                }
                for share in ["\\\\wsl.localhost\\", "\\\\wsl$\\"] {
                    if let Some(remainder) = tool_path.strip_prefix(share) {
                        let inner = remainder.split_once('\\').map(|(_, p)| p).unwrap_or("");
                        return PathBuf::from(format!("/{}", inner.replace('\\', "/")));
                    }
                }
                PathBuf::from(tool_path)
            }
        }
    }
}

/// Split `/mnt/<drive>/rest` into the drive letter and `/rest`
fn split_mount(path: &str) -> Option<(char, &str)> {
    let rest = path.strip_prefix("/mnt/")?;
    let mut chars = rest.chars();
    let drive = chars.next().filter(|c| c.is_ascii_alphabetic())?;
    let after = chars.as_str();
    if after.is_empty() || after.starts_with('/') {
        Some((drive, after))
    } else {
        None
    }
}
