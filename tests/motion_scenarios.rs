// End-to-end motion scenarios against the recording driver

use std::sync::{Arc, Mutex};
use std::time::Duration;

use approx::assert_relative_eq;
use servo_motion::feedback::TracingStatus;
use servo_motion::loader;
use servo_motion::servo::{
    AngleMap, Gesture, GestureError, JogTask, Position, ServoError, ServoGroup, ServoMotor, Sign,
    SimDriver,
};
use tokio::time::sleep;

fn sim() -> Arc<Mutex<SimDriver>> {
    Arc::new(Mutex::new(SimDriver::new()))
}

#[test]
fn reversed_mount_writes_mirrored_raw_angles() {
    let sim = sim();
    let map = AngleMap::new(90.0, Sign::Negative, 0.0, 180.0).unwrap();
    let mut servo = ServoMotor::new("knee", 4, map, 90.0, sim.clone()).unwrap();

    servo.write_angle(0.0).unwrap();
    servo.write_angle(180.0).unwrap();
    assert_eq!(sim.lock().unwrap().channel_writes(4), vec![90.0, -90.0]);
}

#[test]
fn angle_map_round_trip_and_swap_symmetry() {
    let map = AngleMap::new(37.5, Sign::Negative, -60.0, 120.0).unwrap();
    let swapped = AngleMap::new(37.5, Sign::Positive, 120.0, -60.0).unwrap();

    let mut angle = -60.0f32;
    while angle <= 120.0 {
        assert_relative_eq!(map.to_logical(map.to_raw(angle)), angle, epsilon = 1e-4);
        assert_eq!(map.in_range(angle), swapped.in_range(angle));
        angle += 7.5;
    }
    assert_eq!(map.in_range(130.0), swapped.in_range(130.0));
}

#[test]
fn move_by_needs_a_known_angle() {
    let sim = sim();
    let map = AngleMap::new(0.0, Sign::Positive, 0.0, 90.0).unwrap();
    let mut servo = ServoMotor::new("wrist", 0, map, 0.0, sim.clone()).unwrap();

    assert!(matches!(
        servo.move_by(5.0),
        Err(ServoError::Uninitialized { .. })
    ));

    servo.write_angle(10.0).unwrap();
    assert!(servo.move_by(5.0).unwrap());
    assert!(!servo.move_by(100.0).unwrap());
    assert_eq!(servo.angle().unwrap(), 15.0);
    assert_eq!(sim.lock().unwrap().writes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_position_fails_before_any_write() {
    let sim = sim();
    let descriptors = loader::parse_servo_config(
        "i2c servo, a, 0, 0, 1, 0, 90, 0\n\
         i2c servo, b, 1, 0, 1, 0, 90, 0\n\
         i2c servo, c, 2, 90, 1, -50, 50, 0\n",
    )
    .unwrap();
    let driver: servo_motion::servo::SharedDriver = sim.clone();
    let mut group = loader::build_group("leg", &descriptors, |_| Ok(driver.clone())).unwrap();

    let err = group
        .move_to_position(
            &Position::new("reach", vec![110.0, 40.0, 0.0]),
            Duration::ZERO,
            1,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServoError::OutOfRange { angle, .. } if angle == 110.0));

    let err = group
        .move_to_position(&Position::new("short", vec![10.0]), Duration::ZERO, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ServoError::ShapeMismatch { .. }));
    assert!(sim.lock().unwrap().events().is_empty());
}

#[test]
fn gesture_is_exact_at_knots() {
    let g = Gesture::new(
        "step",
        vec![0.0, 0.3, 0.6, 1.0],
        vec![0, 3],
        vec![vec![0.0, 33.3, -12.7, 5.0], vec![1.0, 2.0, 3.0, 4.0]],
    )
    .unwrap();

    assert_eq!(g.angles_at(0.0).unwrap(), vec![0.0, 1.0]);
    assert_eq!(g.angles_at(0.3).unwrap(), vec![33.3, 2.0]);
    assert_eq!(g.angles_at(0.6).unwrap(), vec![-12.7, 3.0]);
    assert_eq!(g.angles_at(1.0).unwrap(), vec![5.0, 4.0]);
    assert!(matches!(
        g.angles_at(1.01),
        Err(GestureError::OutOfDomain { .. })
    ));
    assert!(matches!(
        g.angles_at(-0.5),
        Err(GestureError::OutOfDomain { .. })
    ));
}

#[test]
fn gesture_validation_rejects_bad_shapes() {
    let short = Gesture::new("short", vec![0.0, 0.5, 1.0], vec![0], vec![vec![0.0, 1.0]]);
    assert!(matches!(short, Err(GestureError::Malformed { .. })));

    let channel = Gesture::new("far", vec![0.0, 1.0], vec![16], vec![vec![0.0, 1.0]]);
    assert!(matches!(channel, Err(GestureError::Malformed { .. })));
}

#[tokio::test(start_paused = true)]
async fn velocity_loop_writes_stop_when_stopped() {
    let sim = sim();
    let map = AngleMap::new(90.0, Sign::Positive, -90.0, 90.0).unwrap();
    let mut servo = ServoMotor::new("gripper", 7, map, 0.0, sim.clone()).unwrap();
    servo.write_angle(-80.0).unwrap();
    sim.lock().unwrap().clear();

    let task = JogTask::spawn(
        servo,
        2.0,
        Duration::from_millis(10),
        Arc::new(TracingStatus),
    );
    let control = task.control();

    control.start_increasing();
    sleep(Duration::from_millis(50)).await;
    control.stop();
    sleep(Duration::from_millis(15)).await;
    let writes = sim.lock().unwrap().writes().len();
    assert!((4..=6).contains(&writes), "writes {}", writes);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(sim.lock().unwrap().writes().len(), writes);

    let servo = task.shutdown().await.unwrap();
    assert_relative_eq!(servo.angle().unwrap(), -80.0 + 2.0 * writes as f32);
}

#[tokio::test(start_paused = true)]
async fn group_plays_composed_gesture() {
    let sim = sim();
    let servos = (0..2)
        .map(|ch| {
            let map = AngleMap::new(0.0, Sign::Positive, 0.0, 180.0).unwrap();
            ServoMotor::new("", ch, map, 0.0, sim.clone()).unwrap()
        })
        .collect();
    let mut group = ServoGroup::new("arm", servos);
    assert_eq!(group.servo(1).unwrap().name(), "Servo 1");

    let raise = Gesture::new("raise", vec![0.0, 1.0], vec![0, 1], vec![vec![0.0, 90.0], vec![0.0, 45.0]])
        .unwrap();
    let lower = Gesture::new("lower", vec![0.0, 1.0], vec![0, 1], vec![vec![90.0, 0.0], vec![45.0, 0.0]])
        .unwrap();
    let both = (&raise + &lower).unwrap();
    assert_eq!(both.name(), "raise+lower");

    group
        .execute(&both, Duration::from_millis(200), 4, 1)
        .await
        .unwrap();
    assert_eq!(
        sim.lock().unwrap().channel_writes(0),
        vec![0.0, 45.0, 90.0, 45.0, 0.0]
    );
    assert_eq!(group.angles().unwrap(), vec![0.0, 0.0]);
}
