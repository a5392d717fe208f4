//! Pipeline runtime: a composable chain of stages executed over a typed,
//! per-request heap, with `MappingRunner` projecting a parent pipeline's heap
//! type into a child's for capability reuse without interface inheritance.
//!
//! Grounded on `cordriver.go`'s `Runner`/`SimpleRunner`/`MappingRunner` triad:
//! a stage is a function from `(ctx, heap)` to "continue / respond / abort",
//! a `SimpleRunner` runs an ordered `Vec` of them and stops at the first
//! non-`Continue` outcome, and a `MappingRunner` runs a *parent* runner on a
//! heap value it exports from its own heap, then imports the parent's
//! mutations back before running its own stages.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

/// Carried through every stage: the operation name (for logging), the storage
/// path the request addressed, and a cancellation token the host may trip at
/// any suspension point.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation: &'static str,
    pub path: String,
    pub cancelled: CancellationToken,
}

impl RequestContext {
    pub fn new(operation: &'static str, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            cancelled: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }
}

/// What a stage decided.
pub enum StageOutcome<R> {
    /// Proceed to the next stage.
    Continue,
    /// Short-circuit: this response is final. No rollback of prior side effects.
    Respond(R),
}

/// A single pipeline stage over heap type `H`, producing responses of type `R`.
#[async_trait]
pub trait Stage<H, R>: Send + Sync
where
    H: Send,
    R: Send,
{
    async fn run(&self, ctx: &RequestContext, heap: &mut H) -> Result<StageOutcome<R>, CoreError>;
}

// Plain async closures can be used directly as stages via this blanket impl,
// which keeps handler code in `mashery-engine` free of boilerplate struct
// definitions for every one-off stage.
#[async_trait]
impl<H, R, F, Fut> Stage<H, R> for F
where
    H: Send,
    R: Send,
    F: Fn(&RequestContext, &mut H) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<StageOutcome<R>, CoreError>> + Send,
{
    async fn run(&self, ctx: &RequestContext, heap: &mut H) -> Result<StageOutcome<R>, CoreError> {
        (self)(ctx, heap).await
    }
}

/// Anything that can be run as a pipeline over heap `H`: a `SimpleRunner`, or
/// a `MappingRunner` wrapping another `Runner`.
#[async_trait]
pub trait Runner<H, R>: Send + Sync
where
    H: Send,
    R: Send,
{
    async fn run(&self, ctx: &RequestContext, heap: &mut H) -> Result<StageOutcome<R>, CoreError>;
}

/// An ordered sequence of stages, run in order, stopping at the first
/// non-`Continue` outcome.
pub struct SimpleRunner<H, R> {
    stages: Vec<Box<dyn Stage<H, R>>>,
}

impl<H, R> SimpleRunner<H, R>
where
    H: Send,
    R: Send,
{
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn append(mut self, stage: impl Stage<H, R> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }
}

impl<H, R> Default for SimpleRunner<H, R>
where
    H: Send,
    R: Send,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<H, R> Runner<H, R> for SimpleRunner<H, R>
where
    H: Send,
    R: Send,
{
    async fn run(&self, ctx: &RequestContext, heap: &mut H) -> Result<StageOutcome<R>, CoreError> {
        for (idx, stage) in self.stages.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(CoreError::Storage("request cancelled".into()));
            }
            match stage.run(ctx, heap).await {
                Ok(StageOutcome::Continue) => {
                    tracing::debug!(op = ctx.operation, stage = idx, "stage continue");
                }
                Ok(other) => {
                    tracing::debug!(op = ctx.operation, stage = idx, "stage short-circuit");
                    return Ok(other);
                }
                Err(e) => {
                    tracing::debug!(op = ctx.operation, stage = idx, error = %e, "stage abort");
                    return Err(e);
                }
            }
        }
        Ok(StageOutcome::Continue)
    }
}

/// Projects a child heap `To` into a parent heap `From`, runs the parent
/// pipeline, imports the parent's mutations back, then runs the child's own
/// stages. Composes capabilities without interface cycles.
pub struct MappingRunner<From, To, R>
where
    From: Send,
    To: Send,
    R: Send,
{
    parent: Box<dyn Runner<From, R>>,
    exporter: Box<dyn Fn(&To) -> From + Send + Sync>,
    importer: Box<dyn Fn(From, &mut To) + Send + Sync>,
    own: SimpleRunner<To, R>,
}

impl<From, To, R> MappingRunner<From, To, R>
where
    From: Send,
    To: Send,
    R: Send,
{
    pub fn new(
        parent: impl Runner<From, R> + 'static,
        exporter: impl Fn(&To) -> From + Send + Sync + 'static,
        importer: impl Fn(From, &mut To) + Send + Sync + 'static,
    ) -> Self {
        Self {
            parent: Box::new(parent),
            exporter: Box::new(exporter),
            importer: Box::new(importer),
            own: SimpleRunner::new(),
        }
    }

    pub fn append(mut self, stage: impl Stage<To, R> + 'static) -> Self {
        self.own = self.own.append(stage);
        self
    }
}

#[async_trait]
impl<From, To, R> Runner<To, R> for MappingRunner<From, To, R>
where
    From: Send,
    To: Send,
    R: Send,
{
    async fn run(&self, ctx: &RequestContext, heap: &mut To) -> Result<StageOutcome<R>, CoreError> {
        let mut exported = (self.exporter)(heap);
        match self.parent.run(ctx, &mut exported).await? {
            StageOutcome::Respond(r) => return Ok(StageOutcome::Respond(r)),
            StageOutcome::Continue => {}
        }
        (self.importer)(exported, heap);
        self.own.run(ctx, heap).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Parent {
        counter: i32,
    }

    #[derive(Debug, Default)]
    struct Child {
        counter: i32,
        extra: i32,
    }

    #[tokio::test]
    async fn simple_runner_stops_at_first_response() {
        let ctx = RequestContext::new("test", "p");
        let runner: SimpleRunner<Parent, String> = SimpleRunner::new()
            .append(|_: &RequestContext, h: &mut Parent| {
                h.counter += 1;
                async move { Ok(StageOutcome::Continue) }
            })
            .append(|_: &RequestContext, _: &mut Parent| async move {
                Ok(StageOutcome::Respond("done".to_string()))
            })
            .append(|_: &RequestContext, h: &mut Parent| {
                h.counter += 100;
                async move { Ok(StageOutcome::Continue) }
            });
        let mut heap = Parent::default();
        let out = runner.run(&ctx, &mut heap).await.unwrap();
        assert!(matches!(out, StageOutcome::Respond(s) if s == "done"));
        assert_eq!(heap.counter, 1);
    }

    #[tokio::test]
    async fn mapping_runner_projects_and_imports() {
        let ctx = RequestContext::new("test", "p");
        let parent_runner: SimpleRunner<Parent, String> =
            SimpleRunner::new().append(|_: &RequestContext, h: &mut Parent| {
                h.counter += 10;
                async move { Ok(StageOutcome::Continue) }
            });

        let mapping: MappingRunner<Parent, Child, String> = MappingRunner::new(
            parent_runner,
            |child: &Child| Parent { counter: child.counter },
            |parent: Parent, child: &mut Child| child.counter = parent.counter,
        )
        .append(|_: &RequestContext, h: &mut Child| {
            h.extra += 1;
            async move { Ok(StageOutcome::Continue) }
        });

        let mut heap = Child { counter: 5, extra: 0 };
        let out = mapping.run(&ctx, &mut heap).await.unwrap();
        assert!(matches!(out, StageOutcome::Continue));
        assert_eq!(heap.counter, 15);
        assert_eq!(heap.extra, 1);
    }

    #[tokio::test]
    async fn mapping_runner_short_circuits_before_importing() {
        let ctx = RequestContext::new("test", "p");
        let parent_runner: SimpleRunner<Parent, String> = SimpleRunner::new().append(
            |_: &RequestContext, _: &mut Parent| async move {
                Ok(StageOutcome::Respond("blocked".to_string()))
            },
        );
        let mapping: MappingRunner<Parent, Child, String> =
            MappingRunner::new(parent_runner, |c: &Child| Parent { counter: c.counter }, |_, _| {
                panic!("importer must not run when the parent short-circuits");
            });
        let mut heap = Child::default();
        let out = mapping.run(&ctx, &mut heap).await.unwrap();
        assert!(matches!(out, StageOutcome::Respond(s) if s == "blocked"));
    }
}
