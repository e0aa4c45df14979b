use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9877;

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!("{}/genradio-mpv.sock", std::env::temp_dir().display())
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    "genradio-mpv".to_string()
}

#[cfg(unix)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

#[cfg(windows)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name())
}

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/genradio/ (XDG layout)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("genradio")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("genradio")
    }
}

pub fn config_dir() -> PathBuf {
    // On macOS and Linux, always use ~/.config/genradio/
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("genradio")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("genradio")
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find mpv binary for playback.
/// A copy beside the executable wins over PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    let exe_name = mpv_binary_name();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    if let Ok(path) = std::env::var("PATH") {
        #[cfg(unix)]
        let separator = ":";
        #[cfg(windows)]
        let separator = ";";

        for dir in path.split(separator) {
            let mpv_path = PathBuf::from(dir).join(exe_name);
            if mpv_path.exists() {
                return Some(mpv_path);
            }
        }
    }

    None
}
