use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::backend::OAuthProvider;

const FLOW_TTL: Duration = Duration::from_secs(300);

/// Random PKCE code verifier (43 URL-safe characters).
pub fn generate_verifier() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// An OAuth sign-in waiting for the provider to redirect back.
#[derive(Debug, Clone)]
pub struct PendingFlow {
    pub provider: OAuthProvider,
    pub verifier: String,
}

/// Ephemeral in-memory store for OAuth flows in flight.
/// Each entry is keyed by a random flow ID and expires after 5 minutes.
pub struct OAuthFlowStore {
    flows: HashMap<String, (Instant, PendingFlow)>,
}

impl Default for OAuthFlowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthFlowStore {
    pub fn new() -> Self {
        Self {
            flows: HashMap::new(),
        }
    }

    /// Start a flow, returning its ID. Clears stale entries first.
    pub fn begin(&mut self, provider: OAuthProvider) -> (String, PendingFlow) {
        self.clear_stale();
        let id = uuid::Uuid::now_v7().to_string();
        let flow = PendingFlow {
            provider,
            verifier: generate_verifier(),
        };
        self.flows.insert(id.clone(), (Instant::now(), flow.clone()));
        (id, flow)
    }

    /// Retrieve and remove a pending flow.
    pub fn take(&mut self, id: &str) -> Option<PendingFlow> {
        let (started, flow) = self.flows.remove(id)?;
        if started.elapsed() > FLOW_TTL {
            return None;
        }
        Some(flow)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    fn clear_stale(&mut self) {
        self.flows
            .retain(|_, (started, _)| started.elapsed() <= FLOW_TTL);
    }
}
