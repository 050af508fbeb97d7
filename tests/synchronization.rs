//! Stream alignment tests on synthetic bursts.

use kam_estimation::{find_delay, synchronize, FieldIndex, PipelineError, SampleStream};
use ndarray::Array2;

/// Gaussian-windowed oscillation centred on `center`.
fn burst(n: usize, center: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64 - center;
            (-(t / 15.0).powi(2)).exp() * (1.0 + 0.4 * (0.5 * t).sin())
        })
        .collect()
}

fn stream(names: &[&str], columns: &[Vec<f64>]) -> SampleStream {
    let len = columns[0].len();
    let data = Array2::from_shape_fn((len, columns.len()), |(i, c)| columns[c][i]);
    SampleStream::new(FieldIndex::new(names.iter().copied()).unwrap(), data).unwrap()
}

#[test]
fn test_delay_exact_for_every_shift() {
    let a = burst(400, 200.0);
    for k in -50_isize..=50 {
        let b = burst(400, 200.0 + k as f64);
        assert_eq!(find_delay(&a, &b, 1000).unwrap(), k, "shift {k}");
    }
}

#[test]
fn test_synchronize_aligns_and_joins() {
    let plate = burst(400, 120.0);
    let imu = burst(400, 135.0);
    let reference = stream(&["plate"], &[plate.clone()]);
    let other = stream(&["imu"], &[imu.clone()]);

    let (combined, plan) = synchronize(reference, other, &plate, &imu, 30, 1000).unwrap();
    assert_eq!(plan.delay, 15);
    assert_eq!(plan.crop_reference, 30);
    assert_eq!(plan.crop_other, 45);
    assert_eq!(combined.len(), 355);
    assert_eq!(combined.field_index().names(), ["imu", "plate"]);

    let a = combined.column("imu").unwrap();
    let b = combined.column("plate").unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-12);
    }
}

#[test]
fn test_synchronize_on_accelerometer_norm() {
    let x = burst(300, 100.0);
    let y: Vec<f64> = x.iter().map(|v| 0.5 * v).collect();
    let z: Vec<f64> = x.iter().map(|v| -0.25 * v).collect();
    let imu = stream(&["AccelX_L", "AccelY_L", "AccelZ_L"], &[x, y, z]);
    let norm = imu.channel_norm(&["AccelX_L", "AccelY_L", "AccelZ_L"]).unwrap();

    let plate_signal = burst(300, 90.0);
    let plate = stream(&["force"], &[plate_signal.clone()]);
    let (combined, plan) = synchronize(plate, imu, &plate_signal, &norm, 0, 1000).unwrap();
    assert_eq!(plan.delay, 10);
    assert_eq!(combined.field_index().len(), 4);
}

#[test]
fn test_flat_signal_is_synchronization_failure() {
    let err = find_delay(&[0.0; 64], &burst(64, 30.0), 64).unwrap_err();
    assert!(matches!(err, PipelineError::SynchronizationFailure(_)));
    assert!(!err.is_fatal());
}
