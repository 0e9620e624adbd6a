use dsp::{Pid, PidController, PidState};

pub fn isclose(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    (a - b).abs() <= a.abs().max(b.abs()) * rtol + atol
}

#[test]
fn proportional_first_call() {
    let mut pid = PidController::new(Pid::new(1.0, 0.0, 0.0, 100.0));
    assert_eq!(pid.update(80.0), 20.0);

    let mut pid = PidController::new(
        Pid::new(1.0, 0.0, 0.0, 100.0).with_limits(0.0, 15.0),
    );
    assert_eq!(pid.update(80.0), 15.0);
}

#[test]
fn integral_accumulates() {
    let mut pid = PidController::new(Pid::new(0.0, 1.0, 0.0, 10.0));
    assert_eq!(pid.update(5.0), 5.0);
    assert_eq!(pid.state().integral, 5.0);
    assert_eq!(pid.update(5.0), 10.0);
    assert_eq!(pid.state().integral, 10.0);
}

#[test]
fn derivative_from_zero() {
    let mut pid = PidController::new(Pid::new(0.0, 0.0, 2.0, 50.0));
    assert_eq!(pid.update(40.0), 20.0);
    // error unchanged: no derivative contribution
    assert_eq!(pid.update(40.0), 0.0);
    assert_eq!(pid.state().last_error, 10.0);
}

#[test]
fn output_bounded() {
    let config = Pid::new(6.5, 1.0, 7.0, 330.0).with_limits(0.0, 40.0);
    let mut state = PidState::default();
    for x in [
        -1e12, 1e12, 0.0, 330.0, 329.9, 1e-9, -3.0, 4e6, 300.0, 400.0,
    ] {
        let y = config.update(&mut state, x);
        assert!((0.0..=40.0).contains(&y), "{x} -> {y}");
    }
}

#[test]
fn integral_winds_up() {
    let mut pid = PidController::new(
        Pid::new(0.0, 1.0, 0.0, 10.0).with_limits(-1.0, 1.0),
    );
    for _ in 0..100 {
        assert_eq!(pid.update(0.0), 1.0);
    }
    assert_eq!(pid.state().integral, 1000.0);
    // saturated until the sum unwinds
    assert_eq!(pid.update(20.0), 1.0);
    assert_eq!(pid.state().integral, 990.0);
}

#[test]
fn combined_terms() {
    let mut pid = PidController::new(Pid::new(6.5, 1.0, 7.0, 330.0).with_limits(0.0, 1e3));
    // e = 30: 195 + 30 + 210
    assert!(isclose(pid.update(300.0), 435.0, 0.0, 1e-9));
    // e = 20, sum = 50: 130 + 50 - 70
    assert!(isclose(pid.update(310.0), 110.0, 0.0, 1e-9));
}
