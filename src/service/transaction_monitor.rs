// 交易确认跟踪服务 - 生产级实现
// 每笔在途交易一个轮询任务，推进 pending → confirming → {confirmed | failed}，
// 终态延迟驱逐，订阅方先收到当前快照再收到后续每次变更。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::TrackerConfig;
use crate::domain::chain::REGISTRY;
use crate::domain::{PendingTransaction, TxStatus};
use crate::service::blockchain_client::BlockchainClient;

/// 注册新交易时的输入（状态字段由跟踪器自己填）
#[derive(Debug, Clone)]
pub struct NewPendingTx {
    pub id: String,
    pub tx_hash: String,
    pub chain_id: String,
    pub evm_chain_id: Option<u64>,
    pub token_symbol: String,
    pub amount: String,
    pub to_address: String,
    pub from_address: String,
}

pub struct PendingTxTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    /// 在途交易表：唯一写入方是跟踪器自身，外部只拿克隆快照
    transactions: Mutex<HashMap<String, PendingTransaction>>,
    /// 每个交易 id 当前活跃的后台任务（轮询或驱逐计时）
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    watch_tx: watch::Sender<Vec<PendingTransaction>>,
    client: Arc<BlockchainClient>,
    config: TrackerConfig,
}

impl PendingTxTracker {
    pub fn new(client: Arc<BlockchainClient>, config: TrackerConfig) -> Self {
        let (watch_tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(TrackerInner {
                transactions: Mutex::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
                watch_tx,
                client,
                config,
            }),
        }
    }

    /// 注册一笔已广播的交易并开始轮询
    ///
    /// 没有可轮询端点的链直接标记 confirmed（尽力而为的乐观假设，
    /// 条目带 best_effort 标记），不启动轮询。
    pub fn add_transaction(&self, new: NewPendingTx) {
        let required = new
            .evm_chain_id
            .map(|id| REGISTRY.required_confirmations(id))
            .unwrap_or(crate::domain::chain::DEFAULT_REQUIRED_CONFIRMATIONS);

        let pending = PendingTransaction {
            id: new.id.clone(),
            tx_hash: new.tx_hash.clone(),
            chain_id: new.chain_id,
            evm_chain_id: new.evm_chain_id,
            token_symbol: new.token_symbol,
            amount: new.amount,
            to_address: new.to_address,
            from_address: new.from_address,
            timestamp: Utc::now(),
            status: TxStatus::Pending,
            current_confirmations: 0,
            required_confirmations: required,
            best_effort: false,
        };

        self.inner
            .transactions
            .lock()
            .expect("tracker lock poisoned")
            .insert(new.id.clone(), pending);
        self.inner.notify();

        match new.evm_chain_id {
            Some(chain_id) if self.inner.client.has_evm_endpoint(chain_id) => {
                let inner = Arc::clone(&self.inner);
                let id = new.id.clone();
                let handle =
                    tokio::spawn(poll_loop(inner, new.id, new.tx_hash, chain_id, required));
                self.inner
                    .tasks
                    .lock()
                    .expect("tracker lock poisoned")
                    .insert(id, handle);
            }
            _ => {
                tracing::debug!(id = %new.id, "no polling endpoint, marking confirmed best-effort");
                self.inner.apply_update(&new.id, TxStatus::Confirmed, None, true);
                TrackerInner::schedule_evict(
                    &self.inner,
                    new.id,
                    Duration::from_millis(self.inner.config.confirmed_evict_ms),
                );
            }
        }
    }

    /// 停止轮询并移除条目；对不存在的 id 调用是安全的
    pub fn remove_transaction(&self, id: &str) {
        self.inner.remove(id);
    }

    /// 当前全部在途交易快照
    pub fn transactions(&self) -> Vec<PendingTransaction> {
        self.inner.snapshot()
    }

    /// 按钱包链标识过滤的快照
    pub fn transactions_for_chain(&self, chain_id: &str) -> Vec<PendingTransaction> {
        self.inner
            .snapshot()
            .into_iter()
            .filter(|tx| tx.chain_id == chain_id)
            .collect()
    }

    /// 订阅快照流
    ///
    /// 返回的接收端已标记变更：第一次 `changed().await` 立即完成并
    /// 回放当前快照，之后每次状态变更推送一份新快照。
    pub fn subscribe(&self) -> watch::Receiver<Vec<PendingTransaction>> {
        let mut rx = self.inner.watch_tx.subscribe();
        rx.mark_changed();
        rx
    }

    /// 取消所有轮询并清空
    pub fn clear(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.inner.tasks.lock().expect("tracker lock poisoned");
            tasks.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.abort();
        }
        self.inner
            .transactions
            .lock()
            .expect("tracker lock poisoned")
            .clear();
        self.inner.notify();
    }
}

impl TrackerInner {
    fn snapshot(&self) -> Vec<PendingTransaction> {
        self.transactions
            .lock()
            .expect("tracker lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    fn notify(&self) {
        let _ = self.watch_tx.send(self.snapshot());
    }

    /// 唯一的状态变更汇聚点：检查转换合法性、保证确认数单调不减、通知订阅方
    fn apply_update(
        &self,
        id: &str,
        status: TxStatus,
        confirmations: Option<u64>,
        best_effort: bool,
    ) {
        {
            let mut map = self.transactions.lock().expect("tracker lock poisoned");
            let Some(tx) = map.get_mut(id) else { return };

            if tx.status != status && !tx.status.can_transition_to(&status) {
                tracing::warn!(id, from = %tx.status, to = %status, "illegal status transition dropped");
                return;
            }

            tx.status = status;
            if let Some(count) = confirmations {
                // confirming 期间确认数单调不减
                tx.current_confirmations = tx.current_confirmations.max(count);
            }
            if best_effort {
                tx.best_effort = true;
            }
        }
        self.notify();
    }

    fn remove(&self, id: &str) {
        if let Some(handle) = self
            .tasks
            .lock()
            .expect("tracker lock poisoned")
            .remove(id)
        {
            handle.abort();
        }
        let removed = self
            .transactions
            .lock()
            .expect("tracker lock poisoned")
            .remove(id)
            .is_some();
        if removed {
            self.notify();
        }
    }

    /// 终态后的延迟驱逐；句柄登记在 tasks 表里以便 clear() 取消
    fn schedule_evict(inner: &Arc<TrackerInner>, id: String, delay: Duration) {
        let inner_clone = Arc::clone(inner);
        let id_key = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner_clone.remove(&id);
        });
        inner
            .tasks
            .lock()
            .expect("tracker lock poisoned")
            .insert(id_key, handle);
    }
}

/// 单笔交易的轮询循环：立即轮询一次，之后每 poll_interval 一次
async fn poll_loop(
    inner: Arc<TrackerInner>,
    id: String,
    tx_hash: String,
    chain_id: u64,
    required: u64,
) {
    let interval = Duration::from_millis(inner.config.poll_interval_ms);
    let mut missed_polls: u32 = 0;

    loop {
        match poll_once(&inner, &id, &tx_hash, chain_id, required).await {
            PollOutcome::Terminal => return,
            PollOutcome::Progress => {}
            PollOutcome::Miss => {
                missed_polls += 1;
                if missed_polls >= inner.config.max_poll_attempts {
                    tracing::warn!(id = %id, tx_hash = %tx_hash, attempts = missed_polls,
                        "receipt never appeared, marking failed");
                    inner.apply_update(&id, TxStatus::Failed, None, false);
                    TrackerInner::schedule_evict(
                        &inner,
                        id,
                        Duration::from_millis(inner.config.failed_evict_ms),
                    );
                    return;
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
}

enum PollOutcome {
    /// 进入终态，轮询结束
    Terminal,
    /// 找到了回执并推进了状态
    Progress,
    /// 没有找到回执（或 RPC 出错）
    Miss,
}

async fn poll_once(
    inner: &Arc<TrackerInner>,
    id: &str,
    tx_hash: &str,
    chain_id: u64,
    required: u64,
) -> PollOutcome {
    let receipt = match inner.client.get_transaction_receipt(chain_id, tx_hash).await {
        Ok(Some(receipt)) => receipt,
        Ok(None) => return PollOutcome::Miss,
        Err(e) => {
            tracing::debug!(id, error = %e, "receipt poll failed");
            return PollOutcome::Miss;
        }
    };

    // 链上执行失败：无视剩余轮询次数直接判失败
    if receipt.status == Some(0) {
        inner.apply_update(id, TxStatus::Failed, None, false);
        TrackerInner::schedule_evict(
            inner,
            id.to_string(),
            Duration::from_millis(inner.config.failed_evict_ms),
        );
        return PollOutcome::Terminal;
    }

    let Some(receipt_block) = receipt.block_number else {
        return PollOutcome::Miss;
    };

    let current_block = match inner.client.get_block_number(chain_id).await {
        Ok(block) => block,
        Err(e) => {
            tracing::debug!(id, error = %e, "block height poll failed");
            return PollOutcome::Miss;
        }
    };

    let confirmations = current_block.saturating_sub(receipt_block) + 1;

    if confirmations >= required {
        inner.apply_update(id, TxStatus::Confirmed, Some(confirmations), false);
        TrackerInner::schedule_evict(
            inner,
            id.to_string(),
            Duration::from_millis(inner.config.confirmed_evict_ms),
        );
        PollOutcome::Terminal
    } else {
        inner.apply_update(id, TxStatus::Confirming, Some(confirmations), false);
        PollOutcome::Progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RpcConfig;

    fn offline_tracker() -> PendingTxTracker {
        PendingTxTracker::new(
            Arc::new(BlockchainClient::new(RpcConfig::default())),
            TrackerConfig::default(),
        )
    }

    /// 端点指向不可达的本地端口：允许启动轮询任务但不触网
    fn local_only_tracker() -> PendingTxTracker {
        let mut config = RpcConfig::default();
        for chain_id in [1u64, 56, 137] {
            config.set_evm_endpoint(chain_id, "http://127.0.0.1:9");
        }
        PendingTxTracker::new(
            Arc::new(BlockchainClient::new(config)),
            TrackerConfig::default(),
        )
    }

    fn new_tx(id: &str, evm_chain_id: Option<u64>) -> NewPendingTx {
        NewPendingTx {
            id: id.to_string(),
            tx_hash: format!("0xhash-{}", id),
            chain_id: "chain-0".to_string(),
            evm_chain_id,
            token_symbol: "ETH".to_string(),
            amount: "1.0".to_string(),
            to_address: "0xto".to_string(),
            from_address: "0xfrom".to_string(),
        }
    }

    #[tokio::test]
    async fn test_no_endpoint_marks_confirmed_best_effort() {
        let tracker = offline_tracker();
        // 没有 evm_chain_id 的交易没有轮询端点
        tracker.add_transaction(new_tx("tx-1", None));

        let txs = tracker.transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TxStatus::Confirmed);
        assert!(txs[0].best_effort);
    }

    #[tokio::test]
    async fn test_required_confirmations_from_table() {
        let tracker = local_only_tracker();
        tracker.add_transaction(new_tx("tx-bsc", Some(56)));
        tracker.add_transaction(new_tx("tx-polygon", Some(137)));
        tracker.add_transaction(new_tx("tx-unknown", Some(99999)));

        let txs = tracker.transactions();
        let by_id = |id: &str| txs.iter().find(|t| t.id == id).unwrap().clone();
        assert_eq!(by_id("tx-bsc").required_confirmations, 15);
        assert_eq!(by_id("tx-polygon").required_confirmations, 128);
        assert_eq!(by_id("tx-unknown").required_confirmations, 12);
        tracker.clear();
    }

    #[tokio::test]
    async fn test_subscribe_replays_snapshot_first() {
        let tracker = offline_tracker();
        tracker.add_transaction(new_tx("tx-replay", None));

        // 注册之后才订阅：第一次 changed() 必须立即回放现有快照
        let mut rx = tracker.subscribe();
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "tx-replay");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let tracker = offline_tracker();
        tracker.add_transaction(new_tx("tx-x", None));
        tracker.remove_transaction("tx-x");
        tracker.remove_transaction("tx-x");
        tracker.remove_transaction("never-existed");
        assert!(tracker.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_clear_cancels_everything() {
        let tracker = local_only_tracker();
        tracker.add_transaction(new_tx("a", Some(1)));
        tracker.add_transaction(new_tx("b", Some(1)));
        assert_eq!(tracker.transactions().len(), 2);
        tracker.clear();
        assert!(tracker.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_filter_by_chain() {
        let tracker = offline_tracker();
        let mut tx = new_tx("sol-tx", None);
        tx.chain_id = "chain-11".to_string();
        tracker.add_transaction(tx);
        tracker.add_transaction(new_tx("eth-tx", None));

        assert_eq!(tracker.transactions_for_chain("chain-11").len(), 1);
        assert_eq!(tracker.transactions_for_chain("chain-0").len(), 1);
        assert_eq!(tracker.transactions_for_chain("chain-5").len(), 0);
    }
}
