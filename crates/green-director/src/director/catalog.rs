use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::director::DirectorResult;
use crate::director::descriptor::ParameterMap;

/// Restricts which queues are requested from the site catalog.
/// An empty list does not restrict anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueFilters {
    pub sites: Vec<String>,
    pub ces: Vec<String>,
    pub ce_types: Vec<String>,
    /// Tags that a queue (or its CE) has to declare, all of them.
    pub tags: Vec<String>,
}

impl QueueFilters {
    pub fn accepts_site(&self, site: &str) -> bool {
        self.sites.is_empty() || self.sites.iter().any(|s| s == site)
    }

    pub fn accepts_ce(&self, ce: &CatalogCe) -> bool {
        (self.ces.is_empty() || self.ces.iter().any(|name| *name == ce.name))
            && (self.ce_types.is_empty() || self.ce_types.iter().any(|t| *t == ce.ce_type))
    }

    pub fn accepts_queue(&self, ce: &CatalogCe, queue: &CatalogQueue) -> bool {
        self.tags
            .iter()
            .all(|tag| ce.tags.contains(tag) || queue.tags.contains(tag))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSite {
    pub name: String,
    /// Communities (VOs) served by the site. An empty list serves every community.
    #[serde(default)]
    pub communities: Vec<String>,
    #[serde(default, rename = "ce")]
    pub ces: Vec<CatalogCe>,
}

impl CatalogSite {
    pub fn serves(&self, community: &str) -> bool {
        self.communities.is_empty() || self.communities.iter().any(|c| c == community)
    }

    pub fn queue_count(&self) -> usize {
        self.ces.iter().map(|ce| ce.queues.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogCe {
    pub name: String,
    pub ce_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: ParameterMap,
    #[serde(default, rename = "queue")]
    pub queues: Vec<CatalogQueue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogQueue {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: ParameterMap,
}

pub type CatalogFuture<T> = Pin<Box<dyn Future<Output = DirectorResult<T>>>>;

/// Source of raw site, CE and queue definitions (e.g. a configuration service).
pub trait SiteCatalog {
    /// Return all sites of the given community with their CEs and queues, restricted by `filters`.
    ///
    /// An error means that the catalog itself could not be used (it is unreachable, or the
    /// community is unknown). The order of the returned sites, CEs and queues is preserved by
    /// the resolver.
    fn get_queues(
        &self,
        community: &str,
        filters: &QueueFilters,
    ) -> CatalogFuture<Vec<CatalogSite>>;
}

/// Applies `filters` to a list of sites of the given community and drops everything that ends
/// up empty.
pub fn filter_sites(
    sites: Vec<CatalogSite>,
    community: &str,
    filters: &QueueFilters,
) -> Vec<CatalogSite> {
    sites
        .into_iter()
        .filter(|site| site.serves(community) && filters.accepts_site(&site.name))
        .filter_map(|mut site| {
            site.ces.retain(|ce| filters.accepts_ce(ce));
            for ce in site.ces.iter_mut() {
                let queues = std::mem::take(&mut ce.queues);
                let kept: Vec<CatalogQueue> = queues
                    .into_iter()
                    .filter(|queue| filters.accepts_queue(ce, queue))
                    .collect();
                ce.queues = kept;
            }
            site.ces.retain(|ce| !ce.queues.is_empty());
            (!site.ces.is_empty()).then_some(site)
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default, rename = "site")]
    sites: Vec<CatalogSite>,
}

/// Site catalog stored in a TOML file.
///
/// The file is read again on every request, so it can be edited while the director runs.
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn parse(content: &str) -> DirectorResult<Vec<CatalogSite>> {
        let file: CatalogFile = toml::from_str(content)?;
        Ok(file.sites)
    }
}

impl SiteCatalog for FileCatalog {
    fn get_queues(
        &self,
        community: &str,
        filters: &QueueFilters,
    ) -> CatalogFuture<Vec<CatalogSite>> {
        let path = self.path.clone();
        let community = community.to_string();
        let filters = filters.clone();
        Box::pin(async move {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Cannot read site catalog {}", path.display()))?;
            let sites = Self::parse(&content)
                .with_context(|| format!("Invalid site catalog {}", path.display()))?;
            if !sites.is_empty() && !sites.iter().any(|site| site.serves(&community)) {
                return Err(anyhow::anyhow!(
                    "Community {community} is not known to the site catalog"
                ));
            }
            Ok(filter_sites(sites, &community, &filters))
        })
    }
}
