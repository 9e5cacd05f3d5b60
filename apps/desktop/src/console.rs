//! Line-oriented presentation for the `watch` command.

use std::path::PathBuf;

use shared::view::SceneView;
use url::Url;

const FALLBACK_FILE_NAME: &str = "skybox.jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Submit(String),
    ToggleGrid,
    Download(Option<PathBuf>),
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_intent(line: &str) -> Intent {
    let line = line.trim();
    if line.is_empty() {
        return Intent::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Intent::Submit(line.to_string());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "grid" => Intent::ToggleGrid,
        "download" if rest.is_empty() => Intent::Download(None),
        "download" => Intent::Download(Some(PathBuf::from(rest))),
        "quit" | "exit" => Intent::Quit,
        other => Intent::Unknown(other.to_string()),
    }
}

pub fn render(view: &SceneView) -> String {
    let mut lines = vec![format!(
        "[grid {}]",
        if view.grid_visible { "on" } else { "off" }
    )];
    if let Some(status) = &view.status_label {
        lines.push(format!("status: {status}"));
    }
    if let Some(prompt) = &view.prompt_label {
        lines.push(prompt.clone());
    }
    if let Some(src) = &view.sky_sphere_src {
        lines.push(format!("sky: {src}"));
    }
    if view.download_visible {
        lines.push("(/download to save the skybox)".to_string());
    }
    lines.join("\n")
}

/// Last path segment of the skybox URL, or a fixed name when it has none.
pub fn default_download_path(skybox_url: &str) -> PathBuf {
    Url::parse(skybox_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_FILE_NAME))
}
