mod common;

use std::time::Duration;

use sharkwatch::capture::Windowizer;
use sharkwatch::detection::{DetectionOutcome, Detector, ModelKind};
use sharkwatch::models::config::ModelsConfig;
use sharkwatch::models::request::{CaptureSource, DetectionOptions};

const START: f64 = 1_700_000_000.0;

fn detector() -> Detector {
    Detector::new(
        Windowizer::default(),
        ModelsConfig::default(),
        DetectionOptions::default(),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[test]
fn gaps_become_zero_rows_on_a_contiguous_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gaps.pcap");
    let client = [192, 168, 1, 10];
    let server = [192, 168, 1, 1];
    common::write_pcap(
        &path,
        &[
            (START, common::tcp(client, server, 50000, 443, 0x02)),
            (START + 0.5, common::tcp(server, client, 443, 50000, 0x12)),
            (START + 3.2, common::udp(client, server, 50001, 53, 30)),
            (START + 3.3, vec![0u8; 5]),
        ],
    );

    let conversion = Windowizer::new(1.0, "normal").unwrap().convert_file(&path);
    assert_eq!(conversion.stats.frames_read, 4);
    assert_eq!(conversion.stats.packets_decoded, 3);
    assert_eq!(conversion.stats.decode_errors, 1);

    let table = &conversion.table;
    assert_eq!(table.len(), 4);
    assert_eq!(table.column("packet_count").unwrap(), &[2.0, 0.0, 0.0, 1.0]);
    assert_eq!(table.column("syn_count").unwrap(), &[2.0, 0.0, 0.0, 0.0]);
    assert!(table.labels().iter().all(|l| l == "normal"));

    let steps: Vec<f64> = table.timestamps().windows(2).map(|w| w[1] - w[0]).collect();
    assert!(steps.iter().all(|s| (s - 1.0).abs() < 1e-9));

    assert_eq!(
        table.column("packet_count_diff").unwrap(),
        &[0.0, -2.0, 0.0, 1.0]
    );
    assert!(table.has_column("packet_count_zscore"));
}

#[tokio::test]
async fn every_model_scores_the_held_out_windows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steady.pcap");
    common::write_pcap(&path, &common::steady_traffic(START, 60, Some(50)));

    let options = DetectionOptions {
        models: ModelKind::ALL.to_vec(),
        ..Default::default()
    };
    let outcome = detector()
        .detect(&CaptureSource::Path(path), &options)
        .await
        .unwrap();

    let results = match &outcome {
        DetectionOutcome::Models(results) => results,
        DetectionOutcome::NoResult { .. } => panic!("expected model results"),
    };
    assert_eq!(results.len(), 4);
    for (kind, result) in results {
        assert_eq!(result.anomalies.len(), 18, "{}", kind);
        assert_eq!(result.anomaly_scores.len(), 18, "{}", kind);
        assert!(result.anomaly_scores.iter().all(|s| s.is_finite()), "{}", kind);
    }

    let forest = outcome.get(ModelKind::IsolationForest).unwrap();
    assert!(forest.anomalies[50 - 42]);

    let json = outcome.to_json().unwrap();
    for key in ["isolation_forest", "arima", "sarima", "prophet"] {
        assert!(json.get(key).is_some(), "missing {}", key);
        assert!(json[key].get("model").is_none());
    }
    assert_eq!(json["prophet"]["lower_bound"].as_array().unwrap().len(), 18);
    assert!(json["arima"]["threshold"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn single_window_capture_is_no_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.pcap");
    common::write_pcap(&path, &common::steady_traffic(START, 1, None));

    let bytes = std::fs::read(&path).unwrap();
    let outcome = detector()
        .detect(&CaptureSource::Bytes(bytes), &DetectionOptions::default())
        .await
        .unwrap();

    let json = outcome.to_json().unwrap();
    assert!(json["result"].is_null());
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["packet_count"], 20.0);
    assert!(data[0]["timestamp"].as_str().unwrap().starts_with("2023-11-14T22:13:20"));
}

#[tokio::test]
async fn missing_target_column_fails_the_call() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steady.pcap");
    common::write_pcap(&path, &common::steady_traffic(START, 10, None));

    let options = DetectionOptions {
        models: vec![ModelKind::Arima],
        target_col: "bogus".into(),
        ..Default::default()
    };
    let result = detector().detect(&CaptureSource::Path(path), &options).await;
    assert!(matches!(result, Err(sharkwatch::AppError::Configuration(_))));
}

#[tokio::test]
async fn short_captures_still_score_every_series_model() {
    let options = DetectionOptions {
        models: vec![ModelKind::IsolationForest, ModelKind::Arima, ModelKind::Sarima],
        ..Default::default()
    };

    // 10 windows train on 7, 20 windows on 14
    for (seconds, test_len) in [(10, 3), (20, 6)] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.pcap");
        common::write_pcap(&path, &common::steady_traffic(START, seconds, None));

        let outcome = detector()
            .detect(&CaptureSource::Path(path), &options)
            .await
            .unwrap_or_else(|e| panic!("{} windows: {}", seconds, e));

        for kind in [ModelKind::IsolationForest, ModelKind::Arima, ModelKind::Sarima] {
            let result = outcome
                .get(kind)
                .unwrap_or_else(|| panic!("{} windows: no {} result", seconds, kind));
            assert_eq!(result.anomalies.len(), test_len, "{} {}", seconds, kind);
            assert!(result.anomaly_scores.iter().all(|s| s.is_finite()), "{}", kind);
        }
    }
}
