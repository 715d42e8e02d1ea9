//! Service assembly and lifecycle.
//!
//! [`App::new`] wires the Postgres stores and catalogs, the Redis retry
//! spool, and the AMQP transport into one [`EventBus`] and the two
//! trackers, and subscribes the quest feed handler under every routing key
//! the quest catalog's event-fed objectives name. [`App::start`] declares
//! the broker topology, starts the consumers, and spawns the periodic
//! spool replay; [`App::shutdown`] tears everything down in the reverse
//! order (consumers, then transport, then spool, then the pool).

use crate::config::Config;
use questline_amqp::AmqpTransport;
use questline_bus::{EventBus, EventBusError, QueueSpec};
use questline_core::spool::SpoolError;
use questline_core::store::{QuestCatalog, StoreError};
use questline_core::transport::TransportError;
use questline_postgres::{
    PostgresAchievementCatalog, PostgresAchievementStore, PostgresQuestCatalog,
    PostgresQuestStore, PostgresUserDirectory, run_migrations,
};
use questline_redis::RedisSpoolStore;
use questline_tracker::{AchievementTracker, QuestFeedHandler, QuestTracker};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Errors from service assembly and lifecycle.
#[derive(Error, Debug)]
pub enum AppError {
    /// Connecting to or querying PostgreSQL failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A store or catalog operation failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The retry spool could not be reached.
    #[error("spool error: {0}")]
    Spool(#[from] SpoolError),

    /// The broker could not be reached.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The event bus refused to build, initialize, or close.
    #[error("event bus error: {0}")]
    Bus(#[from] EventBusError),
}

/// The assembled progression service.
///
/// The trackers are public: an embedding API layer drives achievement and
/// quest updates through them while the app runs the consumer side.
pub struct App {
    /// Achievement write path.
    pub achievement_tracker: Arc<AchievementTracker>,
    /// Quest write path.
    pub quest_tracker: Arc<QuestTracker>,
    bus: Arc<EventBus>,
    pool: PgPool,
    replay_interval: Duration,
    replay: Option<JoinHandle<()>>,
}

impl App {
    /// Connect to every backend and wire the components together.
    ///
    /// Runs database migrations and reads the quest catalog to derive the
    /// feed queue's bindings, but does not touch broker topology yet; that
    /// happens in [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Any backend being unreachable or refusing its handshake.
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let database = config.postgres.url.split('@').next_back().unwrap_or("unknown");
        info!(database, "connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;
        run_migrations(&pool).await?;

        let achievement_catalog = Arc::new(PostgresAchievementCatalog::new(pool.clone()));
        let quest_catalog = Arc::new(PostgresQuestCatalog::new(pool.clone()));
        let achievement_store = Arc::new(PostgresAchievementStore::new(pool.clone()));
        let quest_store = Arc::new(PostgresQuestStore::new(pool.clone()));
        let directory = Arc::new(PostgresUserDirectory::new(pool.clone()));

        // Event-fed objectives decide which routing keys the feed queue
        // binds; a catalog with none leaves the service publish-only.
        let quests = quest_catalog.all().await?;
        let mut feed_bindings: Vec<String> = quests
            .iter()
            .flat_map(|quest| quest.objectives.iter())
            .filter_map(|objective| objective.source_event.clone())
            .collect();
        feed_bindings.sort();
        feed_bindings.dedup();
        info!(
            queue = %config.service.feed_queue,
            bindings = feed_bindings.len(),
            "quest feed topology derived"
        );

        let spool = Arc::new(RedisSpoolStore::new(&config.redis.url).await?);
        let transport = Arc::new(
            AmqpTransport::builder(config.amqp.url.as_str())
                .prefetch(config.amqp.prefetch)
                .connection_name(config.service.source.as_str())
                .connect()
                .await?,
        );

        let mut builder = EventBus::builder()
            .transport(transport)
            .spool(spool)
            .source(config.service.source.as_str())
            .exchange(config.service.exchange.as_str());
        if !feed_bindings.is_empty() {
            builder = builder.queue(QueueSpec::new(
                config.service.feed_queue.as_str(),
                feed_bindings.iter().cloned(),
            ));
        }
        let bus = Arc::new(builder.build()?);

        let achievement_tracker = Arc::new(AchievementTracker::new(
            achievement_catalog,
            achievement_store,
            directory.clone(),
            Arc::clone(&bus),
        ));
        let quest_tracker = Arc::new(QuestTracker::new(
            quest_catalog.clone(),
            quest_store,
            directory,
            Arc::clone(&bus),
        ));

        let feed = Arc::new(QuestFeedHandler::new(quest_catalog, quest_tracker.clone()));
        for key in &feed_bindings {
            bus.subscribe(key.clone(), feed.clone()).await;
        }

        info!("service assembled");
        Ok(Self {
            achievement_tracker,
            quest_tracker,
            bus,
            pool,
            replay_interval: config.service.replay_interval(),
            replay: None,
        })
    }

    /// Declare broker topology, start consumers, and spawn the spool
    /// replay task.
    ///
    /// # Errors
    ///
    /// [`AppError::Bus`] if topology assertion fails; a misconfigured
    /// deployment dies here rather than at first publish.
    pub async fn start(&mut self) -> Result<(), AppError> {
        self.bus.initialize().await?;

        let bus = Arc::clone(&self.bus);
        let interval = self.replay_interval;
        // The first tick fires immediately, so anything spooled by a
        // previous run replays at startup.
        self.replay = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = bus.retry_failed_events().await {
                    warn!(error = %e, "spool replay pass failed");
                }
            }
        }));

        info!("service started");
        Ok(())
    }

    /// Stop the replay task, close the bus (consumers, transport, spool),
    /// and drain the database pool.
    ///
    /// # Errors
    ///
    /// The first error the bus hits while closing; shutdown still runs to
    /// completion.
    pub async fn shutdown(mut self) -> Result<(), AppError> {
        if let Some(replay) = self.replay.take() {
            replay.abort();
        }
        let closed = self.bus.close().await;
        self.pool.close().await;
        closed?;

        info!("service stopped");
        Ok(())
    }
}
