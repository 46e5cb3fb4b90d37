use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::{
    conversation::Conversation, executor::Executor, selector::SchedulingSelector,
    stats::Statistics,
};

/// What to run and how: the conversations with their rates, the statistics
/// every stressor records into, and the executor driving it all.
///
/// ```rust,no_run
/// use std::{sync::Arc, time::Duration};
///
/// use gridbench::{
///     Scenario, SchedulingSelector,
///     conversation::{BasicOperationConversation, BasicOperationKind, Conversation},
///     executor::StressorPoolExecutor,
///     operation::OperationRegistry,
///     range::Range,
///     service::InMemoryCache,
/// };
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = OperationRegistry::new();
/// let cache = Arc::new(InMemoryCache::new());
/// let put = BasicOperationConversation::new(
///     BasicOperationKind::Put,
///     registry.register("PUT"),
///     cache,
///     Range::new(0, 100),
/// );
/// let selector = SchedulingSelector::builder()
///     .add(Arc::new(put) as Arc<dyn Conversation>, 10, 1)?
///     .build()?;
/// let statistics = Scenario::builder()
///     .name("put")
///     .selector(selector)
///     .executor(
///         StressorPoolExecutor::builder()
///             .duration(Duration::from_secs(10))
///             .build(),
///     )
///     .build()
///     .run()
///     .await?;
/// println!("{} requests", statistics.request_count());
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct Scenario<E>
where
    E: Executor,
{
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(into))]
    pub selector: Arc<SchedulingSelector<Arc<dyn Conversation>>>,
    /// Prototype; each stressor records into a fresh instance of it.
    #[builder(default)]
    pub statistics: Statistics,
    pub executor: E,
}

impl<E> Scenario<E>
where
    E: Executor,
{
    pub async fn run(&self) -> Result<Statistics, E::Error> {
        self.executor.exec(self).await
    }
}
