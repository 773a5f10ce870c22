//! Link dispatch: delivering produced records to every linked downstream
//! runner, with per-edge provenance and output backpressure.
//!
//! The dispatcher owns the routing table (module id -> inbound queue
//! sender). Graph mutations register and unregister routes under a write
//! lock; dispatching readers never block each other. A reader that
//! observes a momentarily-absent link target (mid-removal) drops the
//! record silently rather than fail.
//!
//! Fan-out deep-copies the record per additional consumer so no two links
//! alias the same maps, and every delivery carries the
//! `(producer, consumer)` pair of the edge it traveled.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::backpressure::{Admission, BackpressureController};
use crate::module::{Link, RunContext, SharedEntries, SharedModule};
use crate::record::Record;

/// One delivery traveling a link: the record plus edge provenance.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub record: Record,
    pub link: Link,
}

/// A tag/variable module attached to a parent input, applied to the
/// parent's in-flight records before dispatch.
#[derive(Clone)]
pub struct TagChild {
    pub id: String,
    pub is_field: bool,
    pub is_tag: bool,
    pub replace_existing: bool,
    pub module: SharedModule,
}

#[derive(Clone)]
struct Route {
    sender: flume::Sender<Delivery>,
    /// Bounded queues (processors) block the producer at capacity;
    /// unbounded queues (outputs) are gated by the drop policy instead.
    bounded: bool,
    backpressure: Option<Arc<BackpressureController>>,
}

/// Shared routing and decoration tables for the running graph.
#[derive(Default)]
pub struct LinkDispatcher {
    routes: RwLock<FxHashMap<String, Route>>,
    children: RwLock<FxHashMap<String, Vec<TagChild>>>,
}

impl LinkDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer's inbound queue under its module id.
    pub(crate) fn register_route(
        &self,
        id: &str,
        sender: flume::Sender<Delivery>,
        bounded: bool,
        backpressure: Option<Arc<BackpressureController>>,
    ) {
        self.routes.write().insert(
            id.to_string(),
            Route {
                sender,
                bounded,
                backpressure,
            },
        );
    }

    /// Remove a consumer's route; subsequent deliveries to it are dropped
    /// silently.
    pub(crate) fn unregister_route(&self, id: &str) {
        self.routes.write().remove(id);
    }

    /// Attach a tag/variable child to its parent input.
    pub(crate) fn register_child(&self, parent: &str, child: TagChild) {
        self.children
            .write()
            .entry(parent.to_string())
            .or_default()
            .push(child);
    }

    /// Detach a tag/variable child wherever it is attached.
    pub(crate) fn unregister_child(&self, child_id: &str) {
        let mut children = self.children.write();
        for attached in children.values_mut() {
            attached.retain(|child| child.id != child_id);
        }
        children.retain(|_, attached| !attached.is_empty());
    }

    /// Current inbound queue length for a consumer, if routed.
    #[must_use]
    pub fn queue_len(&self, id: &str) -> Option<usize> {
        self.routes.read().get(id).map(|route| route.sender.len())
    }

    /// Run the parent input's attached tag/variable children over an
    /// in-flight record, merging their computed pairs per the declared
    /// flags. Child failures are logged and skipped; the record continues.
    pub async fn decorate(&self, parent: &str, record: &mut Record, entries: &SharedEntries) {
        let attached: Vec<TagChild> = self
            .children
            .read()
            .get(parent)
            .cloned()
            .unwrap_or_default();

        for child in attached {
            let cx = RunContext::delivery(Link::new(parent, &child.id), entries.clone());
            let result = child.module.lock().await.run(record.clone(), cx).await;
            match result {
                Ok(pairs) if pairs.is_sentinel() => {}
                Ok(pairs) => {
                    if child.is_field {
                        record.merge_fields(&pairs.fields, child.replace_existing);
                    }
                    if child.is_tag {
                        record.merge_tags(&pairs.fields, child.replace_existing);
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        parent,
                        child = %child.id,
                        %error,
                        "tag child failed, leaving record undecorated"
                    );
                }
            }
        }
    }

    /// Deliver a produced record to every linked consumer.
    ///
    /// Records are deep-copied per additional consumer. Missing targets
    /// (removed mid-flight) are dropped silently; output queues over the
    /// stop limit drop the item per the backpressure policy.
    pub async fn dispatch(&self, producer: &str, record: Record, links: &[String]) {
        if links.is_empty() {
            return;
        }

        // Resolve routes under the read lock, then send without holding it:
        // bounded sends may suspend.
        let resolved: Vec<(String, Route)> = {
            let routes = self.routes.read();
            links
                .iter()
                .filter_map(|consumer| {
                    match routes.get(consumer) {
                        Some(route) => Some((consumer.clone(), route.clone())),
                        None => {
                            tracing::debug!(
                                producer,
                                consumer,
                                "link target not routed, dropping record"
                            );
                            None
                        }
                    }
                })
                .collect()
        };

        let mut remaining = resolved.len();
        let mut record = Some(record);
        for (consumer, route) in resolved {
            remaining -= 1;
            // Last consumer takes the original; everyone else a deep copy.
            let copy = if remaining == 0 {
                record.take().unwrap_or_default()
            } else {
                record.clone().unwrap_or_default()
            };
            let delivery = Delivery {
                record: copy,
                link: Link::new(producer, &consumer),
            };

            if let Some(backpressure) = &route.backpressure
                && backpressure.admit(&consumer, route.sender.len()) == Admission::Drop
            {
                continue;
            }

            if route.bounded {
                if route.sender.send_async(delivery).await.is_err() {
                    tracing::debug!(producer, consumer, "consumer queue closed mid-dispatch");
                }
            } else if route.sender.send(delivery).is_err() {
                tracing::debug!(producer, consumer, "consumer queue closed mid-dispatch");
            }
        }
    }
}
