use crate::OrderedMap;
use crate::common::config::ResolverOptions;
use crate::common::error::DirectorError;
use crate::director::catalog::{CatalogSite, QueueFilters, SiteCatalog};
use crate::director::ce::{CeCache, CeFactory, CeSpec};
use crate::director::descriptor::{PLATFORM, QueueDescriptor, queue_name};
use crate::director::error::QueueError;

/// Outcome of queue resolution. Queues are kept in the order in which the catalog listed them.
#[derive(Debug, Default)]
pub struct Resolution {
    pub queues: OrderedMap<String, QueueDescriptor>,
    /// Queues that could not be resolved.
    pub dropped: Vec<QueueError>,
}

/// Turns raw catalog definitions into queue descriptors backed by CE handles.
pub struct QueueResolver {
    catalog: Box<dyn SiteCatalog>,
    factory: Box<dyn CeFactory>,
    options: ResolverOptions,
    cache: CeCache,
}

impl QueueResolver {
    pub fn new(
        catalog: Box<dyn SiteCatalog>,
        factory: Box<dyn CeFactory>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            catalog,
            factory,
            options,
            cache: CeCache::default(),
        }
    }

    pub fn cache(&self) -> &CeCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        log::debug!("Clearing {} cached CE handle(s)", self.cache.len());
        self.cache.clear();
    }

    /// Fetch the queues of `community` from the catalog and resolve them.
    ///
    /// Fails only if the catalog itself fails. Queues whose CE cannot be instantiated are dropped
    /// and reported in [`Resolution::dropped`].
    pub async fn resolve(
        &mut self,
        filters: &QueueFilters,
        community: &str,
    ) -> crate::Result<Resolution> {
        let sites = self
            .catalog
            .get_queues(community, filters)
            .await
            .map_err(|error| DirectorError::CatalogError(format!("{error:#}")))?;
        log::debug!(
            "Catalog returned {} site(s) with {} queue(s) for community {community}",
            sites.len(),
            sites.iter().map(|site| site.queue_count()).sum::<usize>()
        );
        Ok(resolve_queues(
            &sites,
            &mut self.cache,
            self.factory.as_ref(),
            &self.options,
        ))
    }
}

/// Resolve raw catalog definitions into queue descriptors.
///
/// CE parameters are inherited by all queues of the CE, queue parameters take precedence.
/// CE handles are taken from `cache` or created by `factory` and stored in `cache`.
pub fn resolve_queues(
    sites: &[CatalogSite],
    cache: &mut CeCache,
    factory: &dyn CeFactory,
    options: &ResolverOptions,
) -> Resolution {
    let mut resolution = Resolution::default();

    for site in sites {
        for ce in &site.ces {
            let spec = CeSpec {
                site: &site.name,
                ce_name: &ce.name,
                ce_type: &ce.ce_type,
                parameters: &ce.parameters,
                options,
            };
            let handle = cache.get_or_create(&spec, factory);

            for queue in &ce.queues {
                let name = queue_name(&ce.name, &queue.name);
                let handle = match &handle {
                    Ok(handle) => handle.clone(),
                    Err(error) => {
                        resolution.dropped.push(QueueError::Resolution {
                            queue: name,
                            message: format!(
                                "CE {} ({}) could not be instantiated: {error:#}",
                                ce.name, ce.ce_type
                            ),
                        });
                        continue;
                    }
                };
                if resolution.queues.contains_key(&name) {
                    resolution.dropped.push(QueueError::Resolution {
                        message: format!("duplicate queue at site {}", site.name),
                        queue: name,
                    });
                    continue;
                }

                let mut parameters = ce.parameters.clone();
                parameters.extend(
                    queue
                        .parameters
                        .iter()
                        .map(|(key, value)| (key.clone(), value.clone())),
                );
                if options.check_platform && !parameters.contains_key(PLATFORM) {
                    resolution.dropped.push(QueueError::Resolution {
                        queue: name,
                        message: "no platform is declared".to_string(),
                    });
                    continue;
                }

                let descriptor = QueueDescriptor::new(
                    site.name.clone(),
                    ce.name.clone(),
                    ce.ce_type.clone(),
                    queue.name.clone(),
                    parameters,
                    handle,
                );
                resolution.queues.insert(name, descriptor);
            }
        }
    }

    for error in &resolution.dropped {
        log::warn!("{error}");
    }
    resolution
}
