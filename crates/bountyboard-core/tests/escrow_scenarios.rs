use bountyboard_core::{
    EscrowEngine, EscrowEngineConfig, EscrowError, EscrowEvent, InMemoryVault, Principal, TaskId,
    TaskState, TaskStatus, TokenId,
};
use std::sync::Arc;

const REWARD: u64 = 5_000_000;
const STAKE: u64 = 2_000_000;
const FUNDING: u64 = 20_000_000;

struct Board {
    vault: Arc<InMemoryVault>,
    engine: Arc<EscrowEngine>,
    usdc: TokenId,
    creator: Principal,
    solver_a: Principal,
    solver_b: Principal,
}

impl Board {
    fn new(penalty_sink: Option<&str>) -> Self {
        let vault = Arc::new(InMemoryVault::new());
        let usdc = TokenId::new("USDC");
        let creator = Principal::new("creator");
        let solver_a = Principal::new("solver-a");
        let solver_b = Principal::new("solver-b");
        for who in [&creator, &solver_a, &solver_b] {
            vault.deposit(who, &usdc, FUNDING).unwrap();
            vault.approve(who, &usdc, FUNDING).unwrap();
        }
        let config = EscrowEngineConfig {
            penalty_sink: penalty_sink.map(Principal::new),
            ..EscrowEngineConfig::default()
        };
        let engine = Arc::new(EscrowEngine::new(config, vault.clone()));
        Self {
            vault,
            engine,
            usdc,
            creator,
            solver_a,
            solver_b,
        }
    }

    fn balance(&self, who: &Principal) -> u64 {
        self.vault.balance_of(who, &self.usdc).unwrap()
    }

    fn supply(&self) -> u64 {
        self.vault.total_supply(&self.usdc).unwrap()
    }

    async fn post_haiku(&self) -> TaskId {
        self.engine
            .post(&self.creator, &self.usdc, REWARD, STAKE, "haiku")
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn scenario_a_release_pays_reward_and_returns_stake() {
    let board = Board::new(None);
    let id = board.post_haiku().await;
    assert_eq!(id, TaskId(0));

    let before_submit = board.balance(&board.solver_a);
    board
        .engine
        .submit(id, &board.solver_a, "ipfs://x")
        .await
        .unwrap();
    assert_eq!(board.balance(&board.solver_a), before_submit - STAKE);
    assert_eq!(board.vault.custody_of(id, &board.usdc).unwrap(), REWARD + STAKE);

    board.engine.release(id, &board.solver_a).await.unwrap();
    assert_eq!(board.balance(&board.solver_a), before_submit + REWARD);
    assert_eq!(board.vault.custody_of(id, &board.usdc).unwrap(), 0);

    let task = board.engine.get_task(id).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Released);
    assert!(matches!(task.state(), TaskState::Released { solver, .. } if solver == &board.solver_a));
}

#[tokio::test]
async fn scenario_b_reject_slashes_then_second_solver_is_paid() {
    let board = Board::new(None);
    let id = board.post_haiku().await;

    let a_before_submit = board.balance(&board.solver_a);
    board
        .engine
        .submit(id, &board.solver_a, "ipfs://x")
        .await
        .unwrap();

    let creator_before_reject = board.balance(&board.creator);
    board
        .engine
        .reject(id, &board.solver_a, "low quality")
        .await
        .unwrap();

    assert_eq!(board.balance(&board.solver_a), a_before_submit - STAKE);
    assert_eq!(board.balance(&board.creator), creator_before_reject);
    assert_eq!(board.vault.frozen(&board.usdc).unwrap(), STAKE);
    assert_eq!(
        board.engine.get_task(id).await.unwrap().status(),
        TaskStatus::SlashedOpen
    );

    let b_before_submit = board.balance(&board.solver_b);
    board
        .engine
        .submit(id, &board.solver_b, "ipfs://y")
        .await
        .unwrap();
    board.engine.release(id, &board.solver_b).await.unwrap();

    assert_eq!(board.balance(&board.solver_b), b_before_submit + REWARD);
    assert_eq!(board.balance(&board.solver_a), a_before_submit - STAKE);
    assert_eq!(board.balance(&board.creator), creator_before_reject);
    assert_eq!(board.vault.frozen(&board.usdc).unwrap(), STAKE);
}

#[tokio::test]
async fn value_is_conserved_across_every_transition() {
    let board = Board::new(Some("treasury"));
    let treasury = Principal::new("treasury");
    let initial = board.supply();
    assert_eq!(initial, 3 * FUNDING);

    let first = board.post_haiku().await;
    let second = board
        .engine
        .post(&board.creator, &board.usdc, 1_000, 0, "free to try")
        .await
        .unwrap();
    assert_eq!(board.supply(), initial);

    board.engine.submit(first, &board.solver_a, "a").await.unwrap();
    board.engine.reject(first, &board.solver_a, "no").await.unwrap();
    board.engine.submit(first, &board.solver_b, "b").await.unwrap();
    board.engine.release(first, &board.solver_b).await.unwrap();
    board.engine.submit(second, &board.solver_a, "c").await.unwrap();
    board.engine.reject(second, &board.solver_a, "no").await.unwrap();
    assert_eq!(board.supply(), initial);

    let parties = [
        &board.creator,
        &board.solver_a,
        &board.solver_b,
        &treasury,
    ];
    let external: u64 = parties.iter().map(|p| board.balance(p)).sum();
    let custody = board.vault.custody_of(first, &board.usdc).unwrap()
        + board.vault.custody_of(second, &board.usdc).unwrap();
    assert_eq!(custody, 1_000);
    assert_eq!(external + custody + board.vault.frozen(&board.usdc).unwrap(), initial);
    assert_eq!(board.balance(&treasury), STAKE);
}

#[tokio::test]
async fn rejection_never_credits_the_creator() {
    let board = Board::new(None);
    let id = board.post_haiku().await;
    for round in 0..3 {
        let creator_before = board.balance(&board.creator);
        board
            .engine
            .submit(id, &board.solver_a, format!("ipfs://attempt-{round}"))
            .await
            .unwrap();
        board.engine.reject(id, &board.solver_a, "bait").await.unwrap();
        assert_eq!(board.balance(&board.creator), creator_before);
    }

    let task = board.engine.get_task(id).await.unwrap();
    assert_eq!(task.state(), &TaskState::SlashedOpen);
    assert_eq!(task.rejections(), 3);
    assert_eq!(board.vault.frozen(&board.usdc).unwrap(), 3 * STAKE);
    assert_eq!(board.vault.custody_of(id, &board.usdc).unwrap(), REWARD);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_admit_exactly_one_solver() {
    for _ in 0..25 {
        let board = Board::new(None);
        let id = board.post_haiku().await;

        let engine_a = board.engine.clone();
        let engine_b = board.engine.clone();
        let solver_a = board.solver_a.clone();
        let solver_b = board.solver_b.clone();
        let a = tokio::spawn(async move { engine_a.submit(id, &solver_a, "ipfs://a").await });
        let b = tokio::spawn(async move { engine_b.submit(id, &solver_b, "ipfs://b").await });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(
            loser,
            Err(EscrowError::InvalidState {
                status: TaskStatus::Submitted,
                ..
            })
        ));

        let locked_total = (FUNDING - board.balance(&board.solver_a))
            + (FUNDING - board.balance(&board.solver_b));
        assert_eq!(locked_total, STAKE);
    }
}

#[tokio::test]
async fn release_and_reject_require_the_recorded_solver() {
    let board = Board::new(None);
    let id = board.post_haiku().await;
    board.engine.submit(id, &board.solver_a, "ipfs://x").await.unwrap();

    let err = board.engine.release(id, &board.solver_b).await.unwrap_err();
    assert!(matches!(err, EscrowError::InvalidState { operation: "release", .. }));
    let err = board
        .engine
        .reject(id, &board.solver_b, "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidState { operation: "reject", .. }));

    assert_eq!(
        board.engine.get_task(id).await.unwrap().status(),
        TaskStatus::Submitted
    );
    assert_eq!(board.vault.custody_of(id, &board.usdc).unwrap(), REWARD + STAKE);
}

#[tokio::test]
async fn released_task_is_final() {
    let board = Board::new(None);
    let id = board.post_haiku().await;
    board.engine.submit(id, &board.solver_a, "ipfs://x").await.unwrap();
    board.engine.release(id, &board.solver_a).await.unwrap();

    let err = board
        .engine
        .submit(id, &board.solver_b, "ipfs://late")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EscrowError::InvalidState {
            status: TaskStatus::Released,
            ..
        }
    ));
    let err = board.engine.release(id, &board.solver_a).await.unwrap_err();
    assert!(matches!(err, EscrowError::InvalidState { .. }));
}

#[tokio::test]
async fn failed_stake_lock_leaves_task_open() {
    let board = Board::new(None);
    let id = board.post_haiku().await;
    let poor = Principal::new("poor-solver");
    board.vault.deposit(&poor, &board.usdc, STAKE - 1).unwrap();
    board.vault.approve(&poor, &board.usdc, STAKE).unwrap();

    let err = board.engine.submit(id, &poor, "ipfs://x").await.unwrap_err();
    assert!(matches!(
        err,
        EscrowError::InsufficientFunds {
            required: STAKE,
            available,
            ..
        } if available == STAKE - 1
    ));
    assert_eq!(board.engine.get_task(id).await.unwrap().status(), TaskStatus::Open);
    assert_eq!(board.balance(&poor), STAKE - 1);
    assert_eq!(board.vault.custody_of(id, &board.usdc).unwrap(), REWARD);
}

#[tokio::test]
async fn zero_stake_task_skips_the_lock() {
    let board = Board::new(None);
    let id = board
        .engine
        .post(&board.creator, &board.usdc, REWARD, 0, "no stake")
        .await
        .unwrap();
    let broke = Principal::new("broke");

    board.engine.submit(id, &broke, "ipfs://x").await.unwrap();
    board.engine.reject(id, &broke, "meh").await.unwrap();
    board.engine.submit(id, &broke, "ipfs://y").await.unwrap();
    board.engine.release(id, &broke).await.unwrap();

    assert_eq!(board.balance(&broke), REWARD);
    assert_eq!(board.vault.frozen(&board.usdc).unwrap(), 0);
}

#[tokio::test]
async fn events_carry_amounts_and_principals() {
    let board = Board::new(Some("treasury"));
    let mut events = board.engine.subscribe();
    let id = board.post_haiku().await;
    board.engine.submit(id, &board.solver_a, "ipfs://x").await.unwrap();
    board.engine.reject(id, &board.solver_a, "low quality").await.unwrap();

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(events.recv().await.unwrap());
    }

    assert!(matches!(
        &received[0],
        EscrowEvent::TaskPosted { reward_amount: REWARD, required_stake: STAKE, creator, .. }
            if creator == &board.creator
    ));
    assert!(matches!(
        &received[1],
        EscrowEvent::SolutionSubmitted { solution_reference, .. } if solution_reference == "ipfs://x"
    ));
    assert_eq!(
        received[2],
        EscrowEvent::SolutionRejected {
            task_id: id,
            solver: board.solver_a.clone(),
            reason: "low quality".to_string(),
            stake_slashed: STAKE,
            sink: Some(Principal::new("treasury")),
        }
    );
}

#[tokio::test]
async fn sink_change_applies_to_later_rejections_only() {
    let board = Board::new(None);
    let owner = board.engine.owner().clone();
    let treasury = Principal::new("treasury");

    let id = board.post_haiku().await;
    board.engine.submit(id, &board.solver_a, "a").await.unwrap();
    board.engine.reject(id, &board.solver_a, "x").await.unwrap();
    assert_eq!(board.vault.frozen(&board.usdc).unwrap(), STAKE);

    board
        .engine
        .set_penalty_sink(&owner, Some(treasury.clone()))
        .unwrap();
    board.engine.submit(id, &board.solver_b, "b").await.unwrap();
    board.engine.reject(id, &board.solver_b, "y").await.unwrap();

    assert_eq!(board.vault.frozen(&board.usdc).unwrap(), STAKE);
    assert_eq!(board.balance(&treasury), STAKE);
}

#[tokio::test]
async fn creator_as_penalty_sink_gets_frozen_stake_instead() {
    let board = Board::new(None);
    let config = EscrowEngineConfig {
        owner: board.creator.clone(),
        ..EscrowEngineConfig::default()
    };
    let engine = EscrowEngine::new(config, board.vault.clone());
    engine
        .set_penalty_sink(&board.creator, Some(board.creator.clone()))
        .unwrap();

    let id = engine
        .post(&board.creator, &board.usdc, REWARD, STAKE, "bait")
        .await
        .unwrap();
    let creator_before = board.balance(&board.creator);
    engine.submit(id, &board.solver_a, "ipfs://x").await.unwrap();
    engine.reject(id, &board.solver_a, "rejected").await.unwrap();

    assert_eq!(board.balance(&board.creator), creator_before);
    assert_eq!(board.balance(&board.solver_a), FUNDING - STAKE);
    assert_eq!(board.vault.frozen(&board.usdc).unwrap(), STAKE);
    assert_eq!(board.vault.custody_of(id, &board.usdc).unwrap(), REWARD);

    let rejected = engine.audit_for_task(id).unwrap().pop().unwrap();
    assert_eq!(rejected.kind, "solution_rejected");
    assert!(rejected.payload["sink"].is_null());
}
