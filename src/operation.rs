//! Lifecycle of a single application update.
//!
//! ```text
//! None -> Pending -> Initializing -> Downloading -> Extracting -> Installing -> None
//! any in-flight state -> Cancelling -> None
//! any state -> Error; Error -> Pending (retry) or None (acknowledged)
//! ```
//!
//! Downloading is weighted as the first 75% of the combined progress bar and
//! extraction as the last 25%. Every other phase has no numeric fraction.

/// Share of the combined indicator taken by the download phase
pub const DOWNLOAD_WEIGHT: f64 = 0.75;

/// State of the update operation for one application
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UpdateState {
    #[default]
    None,
    Pending,
    Initializing,
    Downloading { loaded: u64, total: u64 },
    Extracting(f64),
    Installing,
    Cancelling,
    Error(String),
}

/// What a progress widget should show for a state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressIndicator {
    /// Nothing is running
    Hidden,
    /// Running, but no fraction is known (spinner)
    Indeterminate,
    /// Combined completion in `0.0..=1.0`
    Determinate(f64),
}

impl UpdateState {
    /// Position in the download → install pipeline, `None` outside of it
    fn pipeline_rank(&self) -> Option<u8> {
        match self {
            UpdateState::Pending => Some(0),
            UpdateState::Initializing => Some(1),
            UpdateState::Downloading { .. } => Some(2),
            UpdateState::Extracting(_) => Some(3),
            UpdateState::Installing => Some(4),
            _ => None,
        }
    }

    /// Whether an operation is live (anything except `None` and `Error`)
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, UpdateState::None | UpdateState::Error(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, UpdateState::Error(_))
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: &UpdateState) -> bool {
        use UpdateState::*;

        match (self, next) {
            (_, Error(_)) => true,
            (None, Pending) => true,
            (Error(_), Pending | None) => true,
            (Cancelling, None) => true,
            (Installing, None) => true,
            (Pending | Initializing | Downloading { .. } | Extracting(_) | Installing, Cancelling) => {
                true
            }
            // Progress ticks within a phase
            (Downloading { .. }, Downloading { .. }) => true,
            (Extracting(_), Extracting(_)) => true,
            (current, next) => match (current.pipeline_rank(), next.pipeline_rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }

    /// Combined fraction for the single progress indicator.
    ///
    /// Only `Downloading` and `Extracting` have one.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            UpdateState::Downloading { loaded, total } => {
                if *total == 0 {
                    Some(0.0)
                } else {
                    let ratio = (*loaded as f64 / *total as f64).min(1.0);
                    Some(DOWNLOAD_WEIGHT * ratio)
                }
            }
            UpdateState::Extracting(fraction) => {
                let fraction = if fraction.is_nan() {
                    0.0
                } else {
                    fraction.clamp(0.0, 1.0)
                };
                Some(DOWNLOAD_WEIGHT + (1.0 - DOWNLOAD_WEIGHT) * fraction)
            }
            _ => Option::None,
        }
    }

    pub fn indicator(&self) -> ProgressIndicator {
        match self {
            UpdateState::None | UpdateState::Error(_) => ProgressIndicator::Hidden,
            state => match state.fraction() {
                Some(fraction) => ProgressIndicator::Determinate(fraction),
                Option::None => ProgressIndicator::Indeterminate,
            },
        }
    }

    /// Get a human-readable description of the current state
    pub fn description(&self) -> String {
        match self {
            UpdateState::None => "Idle".to_string(),
            UpdateState::Pending => "Waiting...".to_string(),
            UpdateState::Initializing => "Preparing update...".to_string(),
            UpdateState::Downloading { loaded, total } if *total > 0 => {
                format!("Downloading... {} of {}", format_bytes(*loaded), format_bytes(*total))
            }
            UpdateState::Downloading { .. } => "Downloading...".to_string(),
            UpdateState::Extracting(_) => "Extracting...".to_string(),
            UpdateState::Installing => "Installing...".to_string(),
            UpdateState::Cancelling => "Cancelling...".to_string(),
            UpdateState::Error(cause) => format!("Update failed: {}", cause),
        }
    }
}

/// Format bytes as human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
