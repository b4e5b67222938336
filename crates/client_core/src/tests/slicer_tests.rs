use super::*;

fn slicer() -> Slicer<&'static str> {
    Slicer::new(Duration::from_millis(400), Duration::from_millis(600))
}

fn at(start: Instant, millis: u64) -> Instant {
    start + Duration::from_millis(millis)
}

#[test]
fn empty_slicer_has_no_deadline() {
    let mut slicer = slicer();
    assert!(slicer.next_deadline().is_none());
    assert!(slicer.fire(Instant::now()).is_empty());
}

#[test]
fn same_type_burst_is_one_batch() {
    let start = Instant::now();
    let mut slicer = slicer();
    slicer.take("history", "m1", start);
    slicer.take("history", "m2", at(start, 100));
    slicer.take("history", "m3", at(start, 200));

    assert_eq!(slicer.next_deadline(), Some(at(start, 400)));
    assert!(slicer.fire(at(start, 400)).is_empty());

    assert_eq!(slicer.next_deadline(), Some(at(start, 600)));
    assert_eq!(slicer.fire(at(start, 600)), vec![vec!["m1", "m2", "m3"]]);
    assert!(slicer.is_empty());
    assert!(slicer.next_deadline().is_none());
}

#[test]
fn quiet_run_flushes_on_short_tick() {
    let start = Instant::now();
    let mut slicer = Slicer::new(Duration::from_millis(400), Duration::from_millis(2_000));
    slicer.take("history", "m1", start);
    slicer.take("history", "m2", at(start, 100));

    assert!(slicer.fire(at(start, 400)).is_empty());
    assert_eq!(slicer.fire(at(start, 800)), vec![vec!["m1", "m2"]]);
    assert!(slicer.next_deadline().is_none());
}

#[test]
fn type_change_flushes_previous_run_on_next_tick() {
    let start = Instant::now();
    let mut slicer = slicer();
    slicer.take("a", "a1", start);
    slicer.take("a", "a2", at(start, 50));
    slicer.take("b", "b1", at(start, 100));
    slicer.take("a", "a3", at(start, 150));

    assert_eq!(slicer.fire(at(start, 400)), vec![vec!["a1", "a2"], vec!["b1"]]);
    assert_eq!(slicer.len(), 1);
    assert_eq!(slicer.fire(at(start, 600)), vec![vec!["a3"]]);
}

#[test]
fn prolonged_deadline_is_a_hard_ceiling() {
    let start = Instant::now();
    let mut slicer = slicer();
    slicer.take("a", "a1", start);
    slicer.take("a", "a2", at(start, 350));
    assert!(slicer.fire(at(start, 400)).is_empty());
    slicer.take("a", "a3", at(start, 550));

    assert_eq!(slicer.fire(at(start, 600)), vec![vec!["a1", "a2", "a3"]]);

    slicer.take("a", "a4", at(start, 700));
    assert_eq!(slicer.next_deadline(), Some(at(start, 1_100)));
}

#[test]
fn early_fire_is_a_no_op() {
    let start = Instant::now();
    let mut slicer = slicer();
    slicer.take("a", "a1", start);
    assert!(slicer.fire(at(start, 10)).is_empty());
    assert_eq!(slicer.len(), 1);
}
