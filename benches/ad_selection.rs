//! Benchmarks for ad selection
//!
//! Selection runs on every resolved VAST response before a break can start.
//! Pods are cloned and sorted, so cost grows with pod size.

use adcue::ad::selector::select_ads;
use adcue::vast::model::{
    Ad, Creative, CreativeKind, LinearCreative, MediaFile, TrackingEvent, VastResponse,
};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

fn linear_ad(id: usize, sequence: Option<u32>) -> Ad {
    Ad {
        id: format!("ad-{:03}", id),
        sequence,
        ad_system: "Benchmark Adserver".into(),
        ad_title: format!("Benchmark Ad {}", id),
        impression_urls: vec![format!("https://tracking.example.com/impression?ad={}", id)],
        creatives: vec![Creative {
            id: format!("creative-{:03}", id),
            kind: CreativeKind::Linear(LinearCreative {
                duration: 15.0,
                media_files: vec![
                    MediaFile {
                        url: format!("https://ads-cdn.example.com/ad_{}_640.mp4", id),
                        mime_type: "video/mp4".into(),
                        width: 640,
                        height: 360,
                        bitrate: Some(800),
                        ..Default::default()
                    },
                    MediaFile {
                        url: format!("https://ads-cdn.example.com/ad_{}_1280.mp4", id),
                        mime_type: "video/mp4".into(),
                        width: 1280,
                        height: 720,
                        bitrate: Some(2800),
                        ..Default::default()
                    },
                ],
                tracking_events: ["start", "midpoint", "complete"]
                    .iter()
                    .map(|e| TrackingEvent {
                        event: e.to_string(),
                        url: format!("https://tracking.example.com/{}?ad={}", e, id),
                    })
                    .collect(),
                ..Default::default()
            }),
        }],
        ..Default::default()
    }
}

/// Response where pod ads arrive in reverse sequence order
fn pod_response(pod_size: usize) -> VastResponse {
    VastResponse {
        version: "3.0".into(),
        ads: (0..pod_size)
            .rev()
            .map(|i| linear_ad(i, Some(i as u32 + 1)))
            .collect(),
    }
}

/// Response with standalone ads, some of them unplayable
fn standalone_response(ad_count: usize) -> VastResponse {
    let mut ads: Vec<Ad> = (0..ad_count).map(|i| linear_ad(i, None)).collect();
    // First entries carry no media, as no-fill slots often do
    for ad in ads.iter_mut().take(ad_count / 2) {
        ad.creatives.clear();
    }
    VastResponse {
        version: "3.0".into(),
        ads,
    }
}

/// Benchmark: Select from pods of varying size
fn bench_select_pod(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_ads_pod");

    for pod_size in [2, 5, 10] {
        let response = pod_response(pod_size);

        group.bench_with_input(
            BenchmarkId::new("pod", pod_size),
            &response,
            |b, input| {
                b.iter(|| {
                    select_ads(black_box(input)).unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: Select the first playable standalone ad
fn bench_select_standalone(c: &mut Criterion) {
    let response = standalone_response(10);

    c.bench_with_input(
        BenchmarkId::new("select_ads_standalone", "10_ads"),
        &response,
        |b, input| {
            b.iter(|| {
                select_ads(black_box(input)).unwrap();
            });
        },
    );
}

criterion_group!(benches, bench_select_pod, bench_select_standalone);
criterion_main!(benches);
