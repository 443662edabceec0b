//! Wires configuration into producers, consumers and their supervisors.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use bridgeindex_bus::postgres::PgBroker;
use bridgeindex_bus::{BatchHandler, Broker, Consumer, MultiPublisher, Publish, Publisher};
use bridgeindex_core::{
    cursor_key, BackoffConfig, BlockRange, ChainFamily, CursorManager, CursorStore, IndexerError, InitialPosition,
    NoopProducer, Producer, ProducerRegistry, TaskSet,
};
use bridgeindex_cosmos::{
    BlockRangeProducer, BridgeOperationProducer, HttpTendermintClient, OperationQueues, RestCoreQuery,
    TendermintClient, TokenManagerProducer,
};
use bridgeindex_evm::{EvmChain, EvmProducer, EvmRpcClient, HttpEvmClient};
use bridgeindex_indexer::{CollectionIndexer, EvidenceIndexer, ItemIndexer, TransferIndexer, WithdrawalIndexer};
use bridgeindex_near::{HttpNearClient, NearChain, NearProducer, NearRpcClient};
use bridgeindex_storage::postgres::{PgCursorStore, PostgresOptions, PostgresStorage};
use bridgeindex_storage::Storage;

use crate::config::ServiceConfig;

const BLOCK_RANGE_CURSOR: &str = "core_block_ranges";
const BRIDGE_CURSOR_BASE: &str = "core_bridge";
const TOKEN_CURSOR_BASE: &str = "core_tokens";

pub struct App {
    config: ServiceConfig,
    storage: PostgresStorage,
    broker: Arc<dyn Broker>,
    cursors: Arc<dyn CursorStore>,
    shutdown: CancellationToken,
}

impl App {
    pub async fn connect(config: ServiceConfig) -> Result<Self> {
        let opts = PostgresOptions {
            max_connections: config.database.max_connections,
            ..PostgresOptions::default()
        };
        let storage = PostgresStorage::connect_with_options(&config.database.url, opts)
            .await
            .context("connecting to postgres")?;
        let broker = PgBroker::from_pool(storage.pool().clone())
            .await
            .context("initialising queue table")?;
        let cursors = Arc::new(PgCursorStore::new(&storage));
        Ok(Self {
            config,
            storage,
            broker: Arc::new(broker),
            cursors,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn cursors(&self) -> &dyn CursorStore {
        self.cursors.as_ref()
    }

    async fn publisher(&self, queue: &str) -> Result<Publisher> {
        let publisher = Publisher::open(self.broker.as_ref(), queue, self.config.bus.publish_retry.clone())
            .await
            .with_context(|| format!("opening queue {queue}"))?;
        Ok(publisher.with_shutdown(self.shutdown.clone()))
    }

    async fn shared_publisher(&self, queue: &str) -> Result<Arc<dyn Publish>> {
        Ok(Arc::new(self.publisher(queue).await?))
    }

    fn tendermint(&self) -> Result<Arc<HttpTendermintClient>> {
        let core = &self.config.core;
        Ok(Arc::new(HttpTendermintClient::new(&core.tendermint_rpc, core.request_timeout)?))
    }

    /// Block ranges are fanned out to both core-chain producers.
    async fn block_ranges(&self) -> Result<BlockRangeProducer> {
        let core = &self.config.core;
        let queues = &self.config.bus.queues;
        let publisher = MultiPublisher::new(vec![
            self.publisher(&queues.bridge_ranges).await?,
            self.publisher(&queues.token_ranges).await?,
        ]);

        let client = self.tendermint()?;
        let head = client.clone();
        let initial = InitialPosition::resolve(core.skip_catchup, core.start_block, move || async move {
            let height = head.latest_height().await?.unwrap_or(1);
            Ok::<_, IndexerError>(u64::try_from(height).unwrap_or(1))
        })
        .await
        .context("resolving core chain start height")?;

        Ok(BlockRangeProducer::new(
            client,
            CursorManager::new(self.cursors.clone(), BLOCK_RANGE_CURSOR, &initial),
            Arc::new(publisher),
            core.range_limit,
        ))
    }

    /// One producer per configured chain.
    async fn producers(&self) -> Result<ProducerRegistry> {
        let mut registry = ProducerRegistry::new();
        let withdrawals = self.shared_publisher(&self.config.bus.queues.withdrawals).await?;

        for chain in &self.config.evm {
            let client = Arc::new(HttpEvmClient::new(&chain.rpc, chain.request_timeout)?);
            let head = client.clone();
            let initial = InitialPosition::resolve(chain.skip_catchup, chain.start_block, move || async move {
                head.block_number().await
            })
            .await
            .with_context(|| format!("resolving start block of {}", chain.name))?;

            let settings = EvmChain {
                name: chain.name.clone(),
                bridge_address: chain.bridge_address.clone(),
                max_block_range: chain.max_block_range,
            };
            let producer = EvmProducer::for_chain(&settings, client, self.cursors.clone(), &initial, withdrawals.clone());
            registry.register(&chain.name, ChainFamily::Evm, Arc::new(producer))?;
        }

        if let Some(near) = &self.config.near {
            let client = Arc::new(HttpNearClient::new(&near.rpc, near.request_timeout)?);
            let head = client.clone();
            let initial = InitialPosition::resolve(near.skip_catchup, near.start_block, move || async move {
                head.final_height().await
            })
            .await
            .context("resolving NEAR start height")?;

            let cursor = CursorManager::new(self.cursors.clone(), cursor_key(&["near", &near.name]), &initial);
            let settings = NearChain {
                name: near.name.clone(),
                bridge_contract: near.bridge_contract.clone(),
                batch_size: near.batch_size,
            };
            let producer = NearProducer::new(settings, client, cursor, withdrawals.clone());
            registry.register(&near.name, ChainFamily::Near, Arc::new(producer))?;
        }

        if let Some(solana) = &self.config.solana {
            registry.register(&solana.name, ChainFamily::Solana, Arc::new(NoopProducer::new(&solana.name)))?;
        }
        let core = &self.config.core.chain_name;
        registry.register(core, ChainFamily::Core, Arc::new(NoopProducer::new(core)))?;

        Ok(registry)
    }

    /// Every queue consumer, paired with the handler that folds its batches.
    async fn handlers(&self) -> Result<Vec<(String, Arc<dyn BatchHandler>)>> {
        let queues = &self.config.bus.queues;
        let core = &self.config.core;
        let storage: Arc<dyn Storage> = Arc::new(self.storage.clone());
        let query = Arc::new(RestCoreQuery::new(&core.rest_gateway, core.request_timeout)?);
        let client = self.tendermint()?;

        let operations = OperationQueues {
            transfers: self.shared_publisher(&queues.transfers).await?,
            confirmations: self.shared_publisher(&queues.confirmations).await?,
            votes: self.shared_publisher(&queues.votes).await?,
            approvals: self.shared_publisher(&queues.approvals).await?,
            rejections: self.shared_publisher(&queues.rejections).await?,
        };
        let bridge = BridgeOperationProducer::new(
            client.clone(),
            self.cursors.clone(),
            BRIDGE_CURSOR_BASE,
            core.page_size,
            operations,
            storage.clone(),
        )
        .with_shutdown(self.shutdown.clone());
        let tokens = TokenManagerProducer::new(
            client,
            self.cursors.clone(),
            TOKEN_CURSOR_BASE,
            core.page_size,
            self.shared_publisher(&queues.collections).await?,
            self.shared_publisher(&queues.items).await?,
            storage.clone(),
        )
        .with_shutdown(self.shutdown.clone());

        let mut handlers: Vec<(String, Arc<dyn BatchHandler>)> = Vec::new();
        handlers.push((queues.bridge_ranges.clone(), Arc::new(bridge)));
        handlers.push((queues.token_ranges.clone(), Arc::new(tokens)));
        handlers.push((queues.transfers.clone(), Arc::new(TransferIndexer::new(query.clone(), storage.clone()))));
        handlers.push((queues.collections.clone(), Arc::new(CollectionIndexer::new(query.clone(), storage.clone()))));
        handlers.push((queues.items.clone(), Arc::new(ItemIndexer::new(query.clone(), storage.clone()))));
        handlers.push((queues.withdrawals.clone(), Arc::new(WithdrawalIndexer::new(storage.clone()))));
        for queue in [&queues.confirmations, &queues.approvals, &queues.rejections, &queues.votes] {
            let indexer = EvidenceIndexer::new(queue.clone(), query.clone(), storage.clone());
            handlers.push((queue.clone(), Arc::new(indexer)));
        }
        Ok(handlers)
    }

    fn spawn_consumer(&self, tasks: &mut TaskSet, queue: String, handler: Arc<dyn BatchHandler>) {
        let consumer = Arc::new(Consumer::new(
            self.broker.clone(),
            queue.clone(),
            handler,
            self.config.bus.consumer.clone(),
        ));
        let token = self.shutdown.clone();
        tasks.spawn(
            format!("consumer:{queue}"),
            self.shutdown.clone(),
            self.config.supervisor.clone(),
            move || {
                let consumer = consumer.clone();
                let token = token.clone();
                async move { consumer.run(&token).await }
            },
        );
    }

    /// Publish historical ranges without touching the block range cursor.
    pub async fn backfill(&self, ranges: &[BlockRange]) -> Result<()> {
        self.block_ranges().await?.backfill(ranges).await?;
        Ok(())
    }

    /// Run every producer and consumer until Ctrl-C or SIGTERM. A task that
    /// panics stops the whole process with an error.
    pub async fn run(self, backfill: &[BlockRange]) -> Result<()> {
        let ranges = Arc::new(self.block_ranges().await?);
        if !backfill.is_empty() {
            ranges.backfill(backfill).await.context("publishing backfill ranges")?;
        }
        let registry = self.producers().await?;
        let handlers = self.handlers().await?;

        let mut tasks = TaskSet::new();
        registry.spawn_all(&mut tasks, &self.shutdown, &self.config.supervisor);

        let ranges_backoff = BackoffConfig {
            normal_period: self.config.core.poll_interval,
            ..self.config.supervisor.clone()
        };
        let token = self.shutdown.clone();
        tasks.spawn(ranges.name().to_string(), self.shutdown.clone(), ranges_backoff, move || {
            let ranges = ranges.clone();
            let token = token.clone();
            async move { ranges.run(&token).await }
        });

        for (queue, handler) in handlers {
            self.spawn_consumer(&mut tasks, queue, handler);
        }
        info!(
            producers = registry.len(),
            tasks = tasks.len(),
            chains = ?registry.chains().collect::<Vec<_>>(),
            "bridgeindex started"
        );

        let token = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown requested, waiting for tasks");
            token.cancel();
        });
        tasks.join(&self.shutdown).await.context("supervised task died")?;
        info!("bridgeindex stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
