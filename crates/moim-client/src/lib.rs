pub mod chat;
pub mod events;
pub mod notifications;
pub mod settings;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

pub use chat::{ChatStream, ChatView, MeetingChat};
pub use events::{ChatEvent, SyncSource};
pub use notifications::{NotificationBridge, NotificationCenter};
pub use settings::ChatSettings;
pub use state::ChatContext;

const DEFAULT_FILTER: &str = "moim_cli=info,moim_client=debug,moim_net=debug,moim_store=info,warn";

/// Install the global tracing subscriber on stderr. `RUST_LOG` overrides the
/// default filter. Later calls are no-ops.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
