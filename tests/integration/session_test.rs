use std::fs;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use symsync::expr::{ExprArena, ExprId, Kind, evaluate};
use symsync::oracle::{AlwaysInteresting, NeverInteresting};
use symsync::session::{BranchOutcome, Negation, SessionConfig, SolverSession, SyncMode};
use symsync::trace::{parse_trace_string, replay};

const SANJAY: &str = include_str!("../../demos/sanjay/trace");
const SANJAY_INPUT: &[u8] = b"aaaaaaa(xxxxxxx9aa)e+rrrrrrr55566677\n";

fn session_in(dir: &Path, input: &[u8], mode: SyncMode) -> SolverSession<AlwaysInteresting> {
    let config = SessionConfig::new("input")
        .with_output_dir(dir)
        .with_sync_mode(mode);
    SolverSession::with_input(config, input.to_vec(), AlwaysInteresting).unwrap()
}

fn read_case(dir: &Path, n: usize) -> Vec<u8> {
    fs::read(dir.join(format!("{:06}", n))).unwrap()
}

#[test]
fn test_replay_demo_trace() {
    for mode in [SyncMode::Mark, SyncMode::Rewrite] {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path(), SANJAY_INPUT, mode);
        let events = parse_trace_string(SANJAY, session.arena_mut()).unwrap();
        assert_eq!(events.len(), 4);

        let summary = replay(&mut session, &events);
        assert_eq!(summary.events, 4);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.negated, 3);
        assert_eq!(session.generated(), 3);
        assert_eq!(session.statistics().negations_solved, 3);

        let last = read_case(dir.path(), 2);
        assert_eq!(&last[..20], &SANJAY_INPUT[..20]);
        assert_eq!(last[20], b'?');
    }
}

#[test]
fn test_recording_only_builds_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig::new("input").with_output_dir(dir.path());
    let mut session =
        SolverSession::with_input(config, SANJAY_INPUT.to_vec(), NeverInteresting).unwrap();
    let events = parse_trace_string(SANJAY, session.arena_mut()).unwrap();
    replay(&mut session, &events);

    let forest = session.forest();
    let cluster = forest.lookup(7).unwrap();
    for index in [15, 18, 20] {
        assert_eq!(forest.lookup(index), Some(cluster));
    }
    assert_ne!(forest.lookup(0), Some(cluster));
    assert_eq!(forest.stats().unique_trees, 2);
    assert_eq!(session.statistics().solver.queries, 0);
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn test_optimistic_case_written_with_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path(), b"Z", SyncMode::Mark);
    let trace = "\
branch 0x10 1 (eq (read 0) (const 0x5a 8))
branch 0x20 1 (ule (read 0) (const 0x60 8))
";
    let events = parse_trace_string(trace, session.arena_mut()).unwrap();
    let summary = replay(&mut session, &events);
    assert_eq!(summary.errors, 0);

    let optimistic = fs::read(dir.path().join("000001-optimistic")).unwrap();
    assert!(optimistic[0] > 0x60);
}

#[test]
fn test_trace_mismatch_does_not_stop_replay() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path(), b"ab", SyncMode::Mark);
    let trace = "\
branch 0x10 0 true
branch 0x20 1 (eq (read 1) (const 0x62 8))
";
    let events = parse_trace_string(trace, session.arena_mut()).unwrap();
    let summary = replay(&mut session, &events);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.negated, 1);
    assert!(session.forest().lookup(1).is_some());
}

const KINDS: [Kind; 8] = [
    Kind::Equal,
    Kind::Distinct,
    Kind::Ult,
    Kind::Uge,
    Kind::Ugt,
    Kind::Slt,
    Kind::Sge,
    Kind::Sle,
];

/// A random comparison over one or two input bytes
fn random_condition(rng: &mut ChaCha8Rng, arena: &mut ExprArena, len: usize) -> ExprId {
    let kind = KINDS[rng.random_range(0..KINDS.len())];
    let a = arena.read(rng.random_range(0..len));
    let lhs = match rng.random_range(0..4) {
        0 => a,
        1 => {
            let b = arena.read(rng.random_range(0..len));
            arena.binary(Kind::Add, a, b)
        }
        2 => {
            let c = arena.constant(rng.random_range(0..256), 8);
            arena.binary(Kind::Sub, c, a)
        }
        _ => {
            let c = arena.constant(rng.random_range(0..256), 8);
            arena.binary(Kind::Add, a, c)
        }
    };
    let rhs = if rng.random_bool(0.8) {
        arena.constant(rng.random_range(0..256), 8)
    } else {
        arena.read(rng.random_range(0..len))
    };
    if rng.random_bool(0.5) {
        arena.relational(kind, lhs, rhs)
    } else {
        arena.relational(kind, rhs, lhs)
    }
}

/// Every exactly solved negation flips its branch and keeps the recorded prefix
#[test]
fn test_solved_negations_keep_the_prefix() {
    for mode in [SyncMode::Mark, SyncMode::Rewrite] {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for round in 0..4 {
            let dir = tempfile::tempdir().unwrap();
            let input: Vec<u8> = (0..12).map(|_| rng.random()).collect();
            let mut session = session_in(dir.path(), &input, mode);
            let mut prefix: Vec<(ExprId, bool)> = Vec::new();

            for step in 0..20u64 {
                let condition = random_condition(&mut rng, session.arena_mut(), input.len());
                let taken = evaluate(session.arena(), condition, &input) != 0;

                let before = session.generated();
                let outcome = session.on_branch(condition, taken, 0x1000 + step).unwrap();

                if outcome == BranchOutcome::Negated(Negation::Solved) {
                    let case = read_case(dir.path(), before);
                    let flipped = evaluate(session.arena(), condition, &case) != 0;
                    assert_ne!(flipped, taken, "{} round {} step {} did not flip", mode, round, step);
                    for (earlier, earlier_taken) in &prefix {
                        let holds = evaluate(session.arena(), *earlier, &case) != 0;
                        assert_eq!(
                            holds,
                            *earlier_taken,
                            "{} round {} step {} broke {}",
                            mode,
                            round,
                            step,
                            session.arena().render(*earlier)
                        );
                    }
                }
                prefix.push((condition, taken));
            }

            session.check_feasible().unwrap();
        }
    }
}
