use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::domain::alert::{AlertLookup, AlertsByPurl, ServiceResult};
use crate::domain::package::PackageDetail;
use crate::domain::ports::AlertService;
use crate::domain::purl::{Ecosystem, Purl};

/// Turns package details into purls and fetches their alerts in one batch.
///
/// Results are memoized for the lifetime of the resolver, which is one
/// invocation: a second gate in the same session only asks for purls it has
/// not seen yet.
pub struct PurlResolver {
    service: Arc<dyn AlertService>,
    ecosystem: Ecosystem,
    org: Option<String>,
    cache: Mutex<AlertsByPurl>,
}

impl PurlResolver {
    pub fn new(service: Arc<dyn AlertService>, ecosystem: Ecosystem, org: Option<String>) -> Self {
        Self {
            service,
            ecosystem,
            org,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Canonical, deduplicated, sorted purls for the given packages.
    pub fn purls_for(&self, details: &[PackageDetail]) -> Vec<String> {
        details
            .iter()
            .map(|d| Purl::from_node(self.ecosystem, &d.node).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Fetch alerts for every package. Exactly one service call is made,
    /// and none at all when every purl is already cached.
    pub async fn resolve(
        &self,
        details: &[PackageDetail],
        overrides: &BTreeMap<String, String>,
    ) -> ServiceResult<AlertsByPurl> {
        let purls = self.purls_for(details);

        let missing: Vec<String> = match self.cache.lock() {
            Ok(cache) => purls.iter().filter(|p| !cache.contains_key(*p)).cloned().collect(),
            Err(_) => purls.clone(),
        };

        if !missing.is_empty() {
            debug!(requested = missing.len(), cached = purls.len() - missing.len(), "looking up alerts");
            let request = AlertLookup {
                purls: missing,
                overrides: overrides.clone(),
                org: self.org.clone(),
            };
            match self.service.lookup(&request).await {
                ServiceResult::Ok(fetched) => {
                    if let Ok(mut cache) = self.cache.lock() {
                        for purl in &request.purls {
                            let alerts = fetched.get(purl).cloned().unwrap_or_default();
                            cache.insert(purl.clone(), alerts);
                        }
                    }
                }
                ServiceResult::Failed { message, cause } => {
                    warn!(%message, cause = cause.as_deref().unwrap_or(""), "alert lookup failed");
                    return ServiceResult::Failed { message, cause };
                }
            }
        }

        let cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(_) => return ServiceResult::failed("alert cache poisoned", None),
        };
        let alerts = purls
            .into_iter()
            .map(|purl| {
                let alerts = cache.get(&purl).cloned().unwrap_or_default();
                (purl, alerts)
            })
            .collect();
        ServiceResult::Ok(alerts)
    }
}
