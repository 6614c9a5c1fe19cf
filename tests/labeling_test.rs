//! Test the labeling pass and node diagnostics through the public API.

use bumpalo::Bump;
use exprjit::{
    compute_register_count, CollectingSink, CompileError, DiagnosticSink, ExpressionTree, LogSink,
    NodeDescription,
};

extern "C" fn pair(a: i64, b: i64) -> i64 {
    a ^ b
}

extern "C" fn triple(a: i64, b: i64, c: i64) -> i64 {
    a ^ b ^ c
}

extern "C" fn nothing() -> i64 {
    0
}

type PairFn = extern "C" fn(i64, i64) -> i64;

#[test]
fn test_register_count_formula() {
    let table = [((0, 0), 1), ((1, 1), 2), ((2, 2), 3), ((3, 5), 5), ((5, 3), 5), ((1, 0), 1)];
    for ((left, right), expected) in table {
        assert_eq!(compute_register_count(left, right), expected, "({left}, {right})");
    }
}

#[test]
fn test_call_labels_fold_over_arguments() {
    let arena = Bump::new();
    let mut tree = ExpressionTree::new(&arena);

    let none = tree.immediate(nothing as extern "C" fn() -> i64);
    let empty = tree.call(none, &[]).unwrap();
    assert_eq!(tree.label(empty).unwrap(), 0);

    let three = tree.immediate(triple as extern "C" fn(i64, i64, i64) -> i64);
    let consts = (0..3).map(|i| tree.immediate(i as i64)).collect::<Vec<_>>();
    let flat = tree
        .call(three, &[consts[0].into(), consts[1].into(), consts[2].into()])
        .unwrap();
    // The leftmost constant counts as a left leaf, the rest as right leaves.
    assert_eq!(tree.label(flat).unwrap(), 1);

    let two = tree.immediate(pair as PairFn);
    let a = tree.parameter::<i64>(0);
    let b = tree.parameter::<i64>(1);
    let c = tree.parameter::<i64>(2);
    let d = tree.parameter::<i64>(3);
    let left = tree.call(two, &[a.into(), b.into()]).unwrap();
    let right = tree.call(two, &[c.into(), d.into()]).unwrap();
    let outer = tree.call(two, &[left.into(), right.into()]).unwrap();
    assert_eq!(tree.label(outer).unwrap(), 2);
    assert_eq!(tree.register_count(left.id()).unwrap(), Some(1));
}

#[test]
fn test_labeling_is_idempotent() {
    let arena = Bump::new();
    let mut tree = ExpressionTree::new(&arena);
    let two = tree.immediate(pair as PairFn);
    let x = tree.parameter::<i64>(0);
    let y = tree.parameter::<i64>(1);
    let sum = tree.add(x, y).unwrap();
    let product = tree.mul(sum, x).unwrap();
    let root = tree.call(two, &[product.into(), sum.into()]).unwrap();
    let ids = [two.id(), x.id(), y.id(), sum.id(), product.id(), root.id()];

    let first = tree.label(root).unwrap();
    let counts = ids
        .iter()
        .map(|&id| tree.register_count(id).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(tree.label(root).unwrap(), first);
    let again = ids
        .iter()
        .map(|&id| tree.register_count(id).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(counts, again);
    assert!(counts.iter().all(Option::is_some));
}

#[test]
fn test_shared_operands() {
    let arena = Bump::new();
    let mut tree = ExpressionTree::new(&arena);
    let two = tree.immediate(pair as PairFn);
    let p = tree.parameter::<i64>(0);
    let q = tree.parameter::<i64>(1);
    let k = tree.immediate(5i64);
    let once = tree.immediate(6i64);
    let first = tree.call(two, &[p.into(), k.into()]).unwrap();
    let second = tree.call(two, &[q.into(), k.into()]).unwrap();
    let third = tree.add(first, once).unwrap();
    let root = tree.add(third, second).unwrap();

    assert_eq!(tree.parent_count(k.id()).unwrap(), 2);
    assert_eq!(tree.parent_count(two.id()).unwrap(), 2);
    assert_eq!(tree.parent_count(once.id()).unwrap(), 1);
    assert_eq!(tree.parent_count(root.id()).unwrap(), 0);

    tree.label(root).unwrap();
    // A right leaf needs no register of its own unless it is shared.
    assert_eq!(tree.register_count(once.id()).unwrap(), Some(0));
    assert_eq!(tree.register_count(k.id()).unwrap(), Some(1));
    assert_eq!(tree.register_count(first.id()).unwrap(), Some(2));
}

#[test]
fn test_code_generation_requires_labels() {
    let arena = Bump::new();
    let mut tree = ExpressionTree::new(&arena);
    let two = tree.immediate(pair as PairFn);
    let a = tree.immediate(1i64);
    let b = tree.immediate(2i64);
    let call = tree.call(two, &[a.into(), b.into()]).unwrap();

    let err = tree.code_gen_value(call).unwrap_err();
    assert!(matches!(err, CompileError::OrderingViolation { node } if node == call.id()));
}

#[derive(Default)]
struct CountingSink {
    calls: usize,
    cached: usize,
}

impl DiagnosticSink for CountingSink {
    fn describe(&mut self, description: &NodeDescription) {
        if description.name == "CallNode" {
            self.calls += 1;
        }
        if description.cache.is_some() {
            self.cached += 1;
        }
    }
}

#[test]
fn test_diagnostics_after_compilation() {
    let _ = env_logger::builder().is_test(true).try_init();
    let arena = Bump::new();
    let mut tree = ExpressionTree::new(&arena);
    let two = tree.immediate(pair as PairFn);
    let x = tree.parameter::<i64>(0);
    let shared = tree.call(two, &[x.into(), x.into()]).unwrap();
    let root = tree.sub(shared, shared).unwrap();

    let mut before = CollectingSink::new();
    tree.print(&mut before);
    assert!(before.lines().iter().all(|line| line.ends_with("unlabeled, not cached")));

    tree.compile::<extern "C" fn(i64) -> i64>(root).unwrap();

    let mut counting = CountingSink::default();
    tree.print(&mut counting);
    assert_eq!(counting.calls, 1);
    // The parameter and the call.
    assert_eq!(counting.cached, 2);

    let mut after = CollectingSink::new();
    tree.print(&mut after);
    let lines = after.lines();
    assert_eq!(lines.len(), 4);
    assert!(lines[2].starts_with("CallNode id=2 (i64), parents = 2, function = 0, arg0 = 1, arg1 = 1"));
    assert!(lines[2].contains("cached in"));
    assert!(lines[3].ends_with("not cached"));

    tree.print(&mut LogSink);
}
