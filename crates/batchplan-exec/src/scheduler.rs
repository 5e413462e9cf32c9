//! Bucket scheduler.
//!
//! Buckets run parent-first. A bucket's steps are grouped into dependency
//! waves: wave `n` holds the steps whose in-bucket dependencies all sit in
//! earlier waves. Within a wave, sync-and-safe steps are evaluated inline,
//! the remaining pure steps are awaited together under the concurrency
//! limit, and side-effect steps run one at a time under a request-wide lock.
//!
//! Children of a bucket run once the bucket has published its store.
//! Non-deferred children run before deferred ones and siblings run
//! concurrently, unless a child subtree contains side effects: then every
//! child runs one at a time in plan order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use batchplan_core::config::ExecConfig;
use batchplan_core::manifest::RunManifest;
use batchplan_core::{LayerPlanId, StepId, Value};
use batchplan_planner::{LayerPlan, OperationPlan, RowResult, Step, StepBatch, StepNode};

use crate::metrics::emit_span;
use crate::runtime::ExecError;
use crate::store::{BucketStore, Cell, Failure};

const CANCELLED: &str = "request cancelled";

/// One step's batch, ready to be invoked.
struct Call {
    id: StepId,
    step: Arc<dyn Step>,
    sync: bool,
    /// Rows included in the batch, in batch order.
    rows: Vec<usize>,
    batch: StepBatch,
    /// One cell per bucket row; rows excluded from the batch already hold
    /// the failure they inherited.
    cells: Vec<Cell>,
}

/// State shared by every bucket of one request.
pub(crate) struct Run<'a> {
    plan: &'a OperationPlan,
    config: &'a ExecConfig,
    permits: Semaphore,
    side_effects: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    stores: Mutex<HashMap<LayerPlanId, Arc<BucketStore>>>,
    manifest: Mutex<RunManifest>,
}

impl<'a> Run<'a> {
    pub(crate) fn new(
        plan: &'a OperationPlan,
        config: &'a ExecConfig,
        cancel: CancellationToken,
        manifest: RunManifest,
    ) -> Self {
        Self {
            plan,
            config,
            permits: Semaphore::new(config.max_concurrent_batches.max(1)),
            side_effects: tokio::sync::Mutex::new(()),
            cancel,
            stores: Mutex::new(HashMap::new()),
            manifest: Mutex::new(manifest),
        }
    }

    pub(crate) async fn run_root(&self, store: BucketStore) -> Result<(), ExecError> {
        self.run_layer(self.plan.root_layer_plan(), store).await
    }

    pub(crate) fn into_parts(self) -> (HashMap<LayerPlanId, Arc<BucketStore>>, RunManifest) {
        (self.stores.into_inner(), self.manifest.into_inner())
    }

    fn run_child(
        &self,
        layer: LayerPlanId,
        parent: Arc<BucketStore>,
    ) -> BoxFuture<'_, Result<(), ExecError>> {
        async move {
            let lp = self.plan.layer_plan(layer)?;
            if self.cancel.is_cancelled() {
                self.manifest.lock().cancelled = true;
                self.publish(Arc::new(BucketStore::failed(layer, CANCELLED)));
                return Ok(());
            }
            match BucketStore::enter(lp, &parent) {
                Ok(store) => self.run_layer(lp, store).await,
                Err(failure) => {
                    tracing::warn!(bucket = %layer, %failure, "bucket failed at entry");
                    self.publish(Arc::new(BucketStore::failed(layer, failure)));
                    Ok(())
                }
            }
        }
        .boxed()
    }

    async fn run_layer(&self, lp: &LayerPlan, mut store: BucketStore) -> Result<(), ExecError> {
        let started = Instant::now();
        let rows = store.len();
        self.manifest.lock().bucket_rows.insert(lp.id, rows);
        if rows > 0 {
            self.run_steps(lp, &mut store).await?;
        }

        let store = Arc::new(store);
        self.publish(store.clone());
        let elapsed_us = started.elapsed().as_micros() as u64;
        tracing::debug!(bucket = %lp.id, reason = %lp.reason.label(), rows, elapsed_us, "bucket finished");
        emit_span(
            "bucket_finished",
            &[
                ("bucket", lp.id.to_string()),
                ("rows", rows.to_string()),
                ("elapsed_us", elapsed_us.to_string()),
            ],
        );

        if rows > 0 {
            self.run_children(lp, store).await?;
        }
        Ok(())
    }

    async fn run_children(&self, lp: &LayerPlan, store: Arc<BucketStore>) -> Result<(), ExecError> {
        // Children are planned in order, so plan order is side-effect order.
        if lp
            .children
            .iter()
            .any(|c| self.plan.subtree_has_side_effects(*c))
        {
            for child in &lp.children {
                self.run_child(*child, store.clone()).await?;
            }
            return Ok(());
        }

        let mut eager = Vec::new();
        let mut deferred = Vec::new();
        for child in &lp.children {
            if self.plan.layer_plan(*child)?.is_deferred() {
                deferred.push(*child);
            } else {
                eager.push(*child);
            }
        }

        for group in [eager, deferred] {
            if self.config.parallel_buckets && group.len() > 1 {
                future::try_join_all(group.iter().map(|c| self.run_child(*c, store.clone())))
                    .await?;
            } else {
                for child in group {
                    self.run_child(child, store.clone()).await?;
                }
            }
        }
        Ok(())
    }

    async fn run_steps(&self, lp: &LayerPlan, store: &mut BucketStore) -> Result<(), ExecError> {
        let order = self.plan.dependency_order(lp.id)?;
        let cancelled = Failure::from(CANCELLED);

        for wave in self.waves(&order)? {
            if self.cancel.is_cancelled() {
                for id in &wave {
                    store.fail_column(*id, &cancelled);
                }
                self.manifest.lock().cancelled = true;
                continue;
            }

            let mut inline = Vec::new();
            let mut awaited = Vec::new();
            let mut effects = Vec::new();
            for id in wave {
                let node = self.plan.step(id)?;
                let Some(step) = node.step() else { continue };
                let call = self.prepare(lp, node, step.clone(), store)?;
                if node.has_side_effects() {
                    effects.push(call);
                } else if call.sync {
                    inline.push(call);
                } else {
                    awaited.push(call);
                }
            }

            let mut done = Vec::with_capacity(inline.len() + awaited.len() + effects.len());
            for call in inline {
                done.push(self.call(call).await);
            }
            done.extend(future::join_all(awaited.into_iter().map(|c| self.call(c))).await);
            for call in effects {
                let _serial = self.side_effects.lock().await;
                done.push(self.call(call).await);
            }
            for (id, cells) in done {
                store.insert(id, cells);
            }
        }
        Ok(())
    }

    /// Group the bucket's executable steps into dependency waves.
    fn waves(&self, order: &[StepId]) -> Result<Vec<Vec<StepId>>, ExecError> {
        let mut level: HashMap<StepId, usize> = HashMap::new();
        let mut waves: Vec<Vec<StepId>> = Vec::new();
        for id in order {
            let node = self.plan.step(*id)?;
            if node.is_scheduler_filled() {
                level.insert(*id, 0);
                continue;
            }
            let l = node
                .ordering_dependencies()
                .filter_map(|d| level.get(&self.plan.resolve(d)).copied())
                .max()
                .unwrap_or(0)
                + 1;
            level.insert(*id, l);
            if waves.len() < l {
                waves.resize_with(l, Vec::new);
            }
            waves[l - 1].push(*id);
        }
        Ok(waves)
    }

    /// Collect the batch for `node`: every row whose dependencies (positional
    /// and implicit) all succeeded. Other rows inherit the first failure.
    fn prepare(
        &self,
        lp: &LayerPlan,
        node: &StepNode,
        step: Arc<dyn Step>,
        store: &BucketStore,
    ) -> Result<Call, ExecError> {
        let column = |d: StepId| {
            let d = self.plan.resolve(d);
            store.column(d).ok_or_else(|| {
                ExecError::Invariant(format!("{} needs {d}, which {} does not hold", node.id, lp.id))
            })
        };
        let positional = node
            .dependencies
            .iter()
            .map(|d| column(*d))
            .collect::<Result<Vec<_>, _>>()?;
        let implicit = node.implicit_side_effect.map(column).transpose()?;

        let size = store.len();
        let mut cells: Vec<Cell> = vec![Ok(Value::Null); size];
        let mut rows = Vec::with_capacity(size);
        let mut values: Vec<Vec<Value>> = vec![Vec::with_capacity(size); positional.len()];

        for (r, cell) in cells.iter_mut().enumerate() {
            let inherited = positional
                .iter()
                .chain(implicit.iter())
                .find_map(|col| match col.get(r) {
                    Some(Ok(_)) => None,
                    Some(Err(f)) => Some(f.clone()),
                    None => Some(Failure::from("dependency row missing")),
                });
            if let Some(failure) = inherited {
                *cell = Err(failure);
                continue;
            }
            rows.push(r);
            for (i, col) in positional.iter().enumerate() {
                if let Some(Ok(v)) = col.get(r) {
                    values[i].push(v.clone());
                }
            }
        }

        Ok(Call {
            id: node.id,
            sync: node.is_sync_and_safe(),
            batch: StepBatch::new(rows.len(), values),
            step,
            rows,
            cells,
        })
    }

    /// Invoke one batch and spread its outcome over the bucket's rows.
    async fn call(&self, call: Call) -> (StepId, Vec<Cell>) {
        let Call {
            id,
            step,
            sync,
            rows,
            batch,
            mut cells,
        } = call;
        if rows.is_empty() {
            return (id, cells);
        }
        {
            let mut manifest = self.manifest.lock();
            *manifest.step_calls.entry(id).or_default() += 1;
            if step.has_side_effects() {
                manifest.side_effect_order.push(id);
            }
        }
        tracing::trace!(step = %id, name = step.name(), rows = rows.len(), "batch call");

        match self.invoke(step.as_ref(), sync, batch).await {
            Ok(results) => {
                for (r, result) in rows.into_iter().zip(results) {
                    cells[r] = result.map_err(|e| Failure::from(e.to_string()));
                }
            }
            Err(failure) => {
                tracing::warn!(step = %id, name = step.name(), %failure, "batch failed");
                for r in rows {
                    cells[r] = Err(failure.clone());
                }
            }
        }
        (id, cells)
    }

    async fn invoke(
        &self,
        step: &dyn Step,
        sync: bool,
        batch: StepBatch,
    ) -> Result<Vec<RowResult>, Failure> {
        crate::fail_point!("batch_call");
        let expected = batch.len();
        let out = if sync {
            let mut fut = step.execute(batch);
            match (&mut fut).now_or_never() {
                Some(out) => out,
                None => fut.await,
            }
        } else {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| Failure::from(e.to_string()))?;
            step.execute(batch).await
        };
        let out = out.map_err(|e| Failure::from(e.to_string()))?;
        if out.len() != expected {
            return Err(Failure::from(format!(
                "{} returned {} results for a batch of {}",
                step.name(),
                out.len(),
                expected
            )));
        }
        Ok(out)
    }

    fn publish(&self, store: Arc<BucketStore>) {
        self.stores.lock().insert(store.layer(), store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchplan_core::config::PlannerConfig;
    use batchplan_core::hash::Hash256;
    use batchplan_planner::steps::{AccessStep, LambdaStep};
    use batchplan_planner::{build_plan, FieldPlans, RequestNode, RequestTree};

    #[test]
    fn waves_follow_in_bucket_dependencies() {
        let mut plans = FieldPlans::new();
        plans.register("Query", "sum", |ctx, parent, _| {
            let a = ctx.add_step(AccessStep::new("a"), &[parent])?;
            let b = ctx.add_step(AccessStep::new("b"), &[parent])?;
            ctx.add_step(LambdaStep::new("sum", |_| Ok(Value::Null)), &[a, b])
        });
        let request = RequestTree::new("Query", vec![RequestNode::scalar("sum")]);
        let plan = build_plan(&request, &plans, PlannerConfig::default()).unwrap();
        let config = ExecConfig::default();
        let run = Run::new(
            &plan,
            &config,
            CancellationToken::new(),
            RunManifest::new(Hash256([0; 32]), 0),
        );

        let root = plan.root_layer_plan().id;
        let waves = run.waves(&plan.dependency_order(root).unwrap()).unwrap();
        let sum = plan.root_layer_plan().output_map["sum"].step;
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].len(), 2);
        assert_eq!(waves[1], vec![sum]);
    }
}
