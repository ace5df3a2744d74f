use model::DomainSeparator;
use orderbook::{
    account_balances::BalanceBook,
    database::Database,
    events::EventHub,
    matching::{EngineSettings, MatchingEngine},
    orderbook::Orderbook,
    risk::{RiskChecker, RiskConfig},
    serve_task,
};
use secp256k1::SecretKey;
use settlement::{
    chain::Web3Settlement, SettledFillsSink, SettlementQueue, Submitter, SubmitterConfig,
};
use shared::maintenance::{Maintaining, ServiceMaintenance};
use std::{sync::Arc, time::Duration};
use structopt::StructOpt;
use tokio::task;

/// Expiry sweeps and lock cleanup run at least once per second.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

struct DatabaseSink(Arc<Database>);

#[async_trait::async_trait]
impl SettledFillsSink for DatabaseSink {
    async fn fills_settled(
        &self,
        fill_ids: &[model::trade::FillId],
        tx_hash: primitive_types::H256,
    ) -> anyhow::Result<()> {
        use orderbook::database::TradeRetrieving;
        self.0.mark_fills_settled(fill_ids, tx_hash).await
    }
}

#[tokio::main]
async fn main() {
    let args = shared::arguments::Arguments::from_args();
    shared::tracing::initialize(args.log_filter.as_str(), args.log_format);
    tracing::info!("running order book service with {:#?}", args);

    let domain_separator = DomainSeparator::new(args.chain_id, args.contract_address);
    tracing::info!(?domain_separator, "using domain separator");

    let database = Arc::new(Database::new());
    let balances = Arc::new(BalanceBook::new());
    let engine = Arc::new(MatchingEngine::new(EngineSettings {
        auto_matching: args.auto_matching,
        self_trade_prevention: args.self_trade_prevention,
        max_slippage_bps: args.max_slippage_bps,
    }));
    let hub = Arc::new(EventHub::new());
    let settlement_queue = Arc::new(SettlementQueue::new());
    let risk = RiskChecker::new(RiskConfig {
        min_order_amount: args.min_order_amount,
        max_order_amount: args.max_order_amount,
        max_price_deviation_bps: args.max_price_deviation_bps,
        max_orders_per_user: args.max_orders_per_user,
        order_rate_per_minute: args.order_rate_per_minute,
        cancel_rate_per_minute: args.cancel_rate_per_minute,
        blacklisted_users: args.blacklisted_users.iter().copied().collect(),
    });

    let orderbook = Arc::new(Orderbook::new(
        domain_separator,
        database.clone(),
        balances.clone(),
        risk,
        engine,
        hub.clone(),
        settlement_queue.clone(),
        args.enable_balance_check,
    ));

    let transport = web3::transports::Http::new(args.node_url.as_str())
        .expect("node url is not a valid http endpoint");
    let web3 = web3::Web3::new(transport);
    let key = SecretKey::from_slice(args.private_key.as_bytes())
        .expect("private key is not a valid secp256k1 scalar");
    let chain = Arc::new(Web3Settlement::new(
        web3,
        args.settlement_address,
        key,
        args.chain_id,
    ));
    tracing::info!(sender = ?chain.sender(), "settlement submitter account");
    let submitter = Arc::new(Submitter::new(
        settlement_queue,
        chain,
        Arc::new(DatabaseSink(database)),
        domain_separator,
        SubmitterConfig {
            batch_size: args.batch_size,
            batch_timeout: args.batch_timeout,
            gas_multiplier_on_retry: args.gas_multiplier_on_retry,
            confirmation_timeout: args.confirmation_timeout,
        },
    ));

    let serve = serve_task(
        orderbook.clone(),
        hub,
        args.bind_address,
        orderbook::api::Timeouts {
            read: args.read_timeout,
            write: args.write_timeout,
        },
    );
    let maintenance = ServiceMaintenance::new(vec![
        orderbook as Arc<dyn Maintaining>,
        balances as Arc<dyn Maintaining>,
    ]);
    let maintenance_task =
        task::spawn(maintenance.run_maintenance_on_interval(MAINTENANCE_INTERVAL));
    let submitter_task = task::spawn(submitter.run_forever());

    tokio::select! {
        result = serve => tracing::error!(?result, "serve task exited"),
        result = maintenance_task => tracing::error!(?result, "maintenance task exited"),
        result = submitter_task => tracing::error!(?result, "settlement submitter exited"),
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    };
}
