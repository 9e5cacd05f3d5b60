//! Presentation model derived from the replicated session state.

use crate::domain::SessionState;

/// What a participant should render for the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneView {
    pub grid_visible: bool,
    pub status_label: Option<String>,
    pub prompt_label: Option<String>,
    pub download_visible: bool,
    pub sky_sphere_src: Option<String>,
}

impl SceneView {
    pub fn from_state(state: &SessionState, grid_visible: bool) -> Self {
        Self {
            grid_visible,
            status_label: state.status.clone(),
            prompt_label: state
                .submission
                .as_ref()
                .map(|prompt| format!("Prompt: {prompt}")),
            download_visible: state.skybox_url.is_some(),
            sky_sphere_src: state.skybox_url.clone(),
        }
    }
}

/// Participant-local display state. Never replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalView {
    pub grid_visible: bool,
}

impl Default for LocalView {
    fn default() -> Self {
        Self { grid_visible: true }
    }
}

impl LocalView {
    pub fn toggle_grid(&mut self) -> bool {
        self.grid_visible = !self.grid_visible;
        self.grid_visible
    }

    pub fn render(&self, state: &SessionState) -> SceneView {
        SceneView::from_state(state, self.grid_visible)
    }
}
