//! Per-turn provider selection.
//!
//! `select` is pure over an explicit `ProviderSettings`; the router supplies
//! the connectivity answer and maps choices back to live clients.

use crate::inference::connectivity::ConnectivityCheck;
use crate::inference::ChatProvider;
use crate::types::ProviderChoice;
use std::sync::Arc;
use tracing::{debug, info};

/// One provider as seen by selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSlot {
    pub id: String,
    pub model: String,
    /// Always true for the local provider.
    pub has_credential: bool,
}

/// Remote providers in priority order, plus the always-available local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub remotes: Vec<ProviderSlot>,
    pub local: ProviderSlot,
}

impl ProviderSettings {
    fn qualified_remotes(&self) -> impl Iterator<Item = &ProviderSlot> {
        self.remotes.iter().filter(|r| r.has_credential)
    }
}

fn choice(slot: &ProviderSlot, is_fallback: bool) -> ProviderChoice {
    ProviderChoice {
        provider: slot.id.clone(),
        model: slot.model.clone(),
        is_fallback,
    }
}

/// Pick the provider for a turn.
///
/// Connected: the first credentialed remote in priority order. Otherwise the
/// local provider, flagged as a fallback only when it displaces a
/// credentialed remote (i.e. we are offline). With no credentials at all the
/// local provider is the only option, not a demotion.
pub fn select(settings: &ProviderSettings, is_connected: bool) -> ProviderChoice {
    let first_remote = settings.qualified_remotes().next();
    match (is_connected, first_remote) {
        (true, Some(remote)) => choice(remote, false),
        (false, Some(_)) => choice(&settings.local, true),
        (_, None) => choice(&settings.local, false),
    }
}

/// Ordered, deduplicated chain starting with `first` and ending with the
/// local provider. Remaining credentialed remotes are included only when
/// connected.
pub fn provider_chain(
    settings: &ProviderSettings,
    first: &ProviderChoice,
    is_connected: bool,
) -> Vec<ProviderChoice> {
    let mut chain = vec![first.clone()];
    if is_connected {
        for remote in settings.qualified_remotes() {
            chain.push(choice(remote, true));
        }
    }
    chain.push(choice(&settings.local, true));

    let mut seen = std::collections::HashSet::new();
    chain.retain(|c| seen.insert(c.provider.clone()));
    chain
}

/// Provider selected for a turn together with its escalation chain.
pub struct TurnPlan {
    pub choice: ProviderChoice,
    pub chain: Vec<Arc<dyn ChatProvider>>,
}

/// A remote provider client and whether its credential is configured.
pub struct RemoteProvider {
    pub client: Arc<dyn ChatProvider>,
    pub has_credential: bool,
}

/// Live provider set plus the connectivity probe.
pub struct ProviderRouter {
    settings: ProviderSettings,
    remotes: Vec<Arc<dyn ChatProvider>>,
    local: Arc<dyn ChatProvider>,
    connectivity: Arc<dyn ConnectivityCheck>,
}

impl ProviderRouter {
    pub fn new(
        remotes: Vec<RemoteProvider>,
        local: Arc<dyn ChatProvider>,
        connectivity: Arc<dyn ConnectivityCheck>,
    ) -> Self {
        let settings = ProviderSettings {
            remotes: remotes
                .iter()
                .map(|r| ProviderSlot {
                    id: r.client.id().to_string(),
                    model: r.client.model().to_string(),
                    has_credential: r.has_credential,
                })
                .collect(),
            local: ProviderSlot {
                id: local.id().to_string(),
                model: local.model().to_string(),
                has_credential: true,
            },
        };
        Self {
            settings,
            remotes: remotes.into_iter().map(|r| r.client).collect(),
            local,
            connectivity,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Probe connectivity once and build this turn's plan.
    pub async fn plan(&self) -> TurnPlan {
        let is_connected = if self.settings.qualified_remotes().next().is_some() {
            self.connectivity.is_connected().await
        } else {
            false
        };
        let choice = select(&self.settings, is_connected);
        if choice.is_fallback {
            info!("Offline: serving turn from local provider {}", choice.provider);
        } else {
            debug!("Selected provider {}/{}", choice.provider, choice.model);
        }

        let chain = provider_chain(&self.settings, &choice, is_connected)
            .iter()
            .filter_map(|c| self.client(&c.provider))
            .collect();
        TurnPlan { choice, chain }
    }

    fn client(&self, id: &str) -> Option<Arc<dyn ChatProvider>> {
        if self.local.id() == id {
            return Some(self.local.clone());
        }
        self.remotes.iter().find(|r| r.id() == id).cloned()
    }
}
