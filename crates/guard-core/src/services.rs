//! Wiring for the core components from an [`AgentConfig`].

use crate::admin::AdminSurface;
use crate::auth::AuthGate;
use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::detector::Detector;
use crate::error::GuardResult;
use crate::incident::{IncidentSink, JsonlIncidentLog};
use crate::live::LiveMonitor;
use crate::penalty::{Directive, PenaltyManager};
use crate::pipeline::TranscriptWorker;
use crate::sanction::SanctionConfig;
use crate::store::{MemoryViolationStore, SledViolationStore, ViolationStore};
use crate::swap::SwapCell;
use crate::wordlist::WordlistStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

pub struct CoreServices {
    pub machine_id: String,
    pub wordlist: Arc<WordlistStore>,
    pub sanctions: Arc<SwapCell<SanctionConfig>>,
    pub incidents: Arc<dyn IncidentSink>,
    pub penalties: Arc<PenaltyManager>,
    pub live: Arc<LiveMonitor>,
    pub admin: Arc<AdminSurface>,
}

impl CoreServices {
    /// Build every core component. Unreadable wordlist or sanction files are logged
    /// and replaced by an empty wordlist / the default ladder so the agent still starts.
    pub fn from_config(
        config: &AgentConfig,
        clock: Arc<dyn Clock>,
    ) -> GuardResult<(Self, mpsc::UnboundedReceiver<Directive>)> {
        let wordlist = match WordlistStore::open(&config.wordlist_path) {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "[CORE] wordlist rejected; starting with an empty list");
                WordlistStore::default()
            }
        };
        let wordlist = Arc::new(wordlist);

        let sanctions = match SanctionConfig::open(&config.sanction_path) {
            Ok(sanctions) => sanctions,
            Err(e) => {
                error!(error = %e, "[CORE] sanction config rejected; using the default ladder");
                SanctionConfig::default()
            }
        };
        let sanctions = Arc::new(SwapCell::new(sanctions));

        let incidents: Arc<dyn IncidentSink> =
            Arc::new(JsonlIncidentLog::new(&config.incident_log_path));

        let store: Arc<dyn ViolationStore> = if config.persist_violations {
            Arc::new(SledViolationStore::open_path(&config.state_db_path)?)
        } else {
            Arc::new(MemoryViolationStore::new())
        };

        let (penalties, directives) = PenaltyManager::new(
            Arc::clone(&sanctions),
            Arc::clone(&incidents),
            store,
            Arc::clone(&clock),
        );
        let penalties = Arc::new(penalties);
        let live = Arc::new(LiveMonitor::new(config.live_window(), Arc::clone(&clock)));

        let admin = AdminSurface::builder(
            config.machine_id.clone(),
            Arc::clone(&wordlist),
            Arc::clone(&sanctions),
            Arc::clone(&penalties),
            Arc::clone(&live),
            Arc::clone(&incidents),
            AuthGate::new(clock),
        )
        .wordlist_path(&config.wordlist_path)
        .sanction_path(&config.sanction_path)
        .build();

        info!(
            machine_id = %config.machine_id,
            persist_violations = config.persist_violations,
            "[CORE] services ready"
        );

        Ok((
            Self {
                machine_id: config.machine_id.clone(),
                wordlist,
                sanctions,
                incidents,
                penalties,
                live,
                admin: Arc::new(admin),
            },
            directives,
        ))
    }

    pub fn detector(&self) -> Detector {
        Detector::new(Arc::clone(&self.wordlist))
    }

    pub fn transcript_worker(&self) -> TranscriptWorker {
        TranscriptWorker::new(
            self.machine_id.clone(),
            self.detector(),
            Arc::clone(&self.penalties),
            Arc::clone(&self.live),
        )
    }
}
