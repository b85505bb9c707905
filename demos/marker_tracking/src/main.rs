use argh::FromArgs;
use std::path::PathBuf;

use fiducial::pnp::{CameraModel, RawPose};
use fiducial::tracking::{
    square_marker_points, CameraConfig, Correspondences, PoseData, PoseTracker, TrackOutcome,
    TrackerConfig, Transform,
};
use glam::{DVec2, DVec3, Mat4};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[derive(FromArgs)]
/// Track synthetic square markers moving in front of a camera
struct Args {
    /// path to a tracker configuration (JSON)
    #[argh(option)]
    config: Option<PathBuf>,

    /// path to a camera configuration (JSON); defaults to an uncalibrated 1280x720 camera
    #[argh(option)]
    camera: Option<PathBuf>,

    /// number of frames to simulate
    #[argh(option, default = "120")]
    frames: usize,

    /// number of markers
    #[argh(option, default = "2")]
    markers: u32,

    /// marker side length in meters
    #[argh(option, default = "0.1")]
    marker_length: f64,

    /// corner noise in pixels
    #[argh(option, default = "0.3")]
    noise_px: f64,

    /// probability that a marker is missed in a frame
    #[argh(option, default = "0.05")]
    dropout: f64,

    /// random seed
    #[argh(option, default = "42")]
    seed: u64,
}

/// Ground-truth pose of marker `id` at frame `i`: a slow circle at varying depth.
fn trajectory(id: u32, i: usize) -> RawPose {
    let t = i as f64 * 0.05 + id as f64 * 1.3;
    let offset = id as f64 * 0.15 - 0.1;
    RawPose::new(
        DVec3::new(0.2 * t.sin(), 0.3 * (0.7 * t).cos(), 0.1 * t),
        DVec3::new(offset + 0.1 * t.cos(), 0.05 * t.sin(), 0.8 + 0.2 * (0.5 * t).sin()),
    )
}

fn detect(
    camera: &CameraModel,
    pose: &RawPose,
    length: f64,
    noise_px: f64,
    rng: &mut StdRng,
) -> Option<Correspondences> {
    let size = camera.image_size();
    let mut corners = [DVec2::ZERO; 4];
    for (corner, p) in corners.iter_mut().zip(square_marker_points(length)) {
        let uv = camera.project(pose.transform_point(p))?;
        if uv.x < 0.0 || uv.y < 0.0 || uv.x >= size.width as f64 || uv.y >= size.height as f64 {
            return None;
        }
        *corner = uv + DVec2::new(
            rng.random_range(-noise_px..=noise_px),
            rng.random_range(-noise_px..=noise_px),
        );
    }
    Some(Correspondences::square_marker(length, corners))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config = match &args.config {
        Some(path) => TrackerConfig::from_path(path)?,
        None => TrackerConfig::default(),
    };
    let camera = match &args.camera {
        Some(path) => CameraConfig::from_path(path)?.build()?,
        None => CameraModel::derive_default(1280, 720)?,
    };
    let (fov_x, fov_y) = camera.field_of_view();
    log::info!("camera fov: {fov_x:.1} x {fov_y:.1} degrees");

    let mut tracker: PoseTracker<u32, Transform> = PoseTracker::new(camera.clone(), config)?;
    for id in 0..args.markers {
        tracker.register(id, Transform::default());
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut updated = 0usize;
    let mut skipped = 0usize;
    let mut sum_err = 0.0f64;

    for frame in 0..args.frames {
        let mut observations = Vec::new();
        for id in 0..args.markers {
            if rng.random_bool(args.dropout.clamp(0.0, 1.0)) {
                continue;
            }
            let truth = trajectory(id, frame);
            if let Some(corr) = detect(&camera, &truth, args.marker_length, args.noise_px, &mut rng) {
                observations.push((id, corr));
            }
        }

        let report = tracker.process_frame(Mat4::IDENTITY, observations);
        for (id, outcome) in &report.outcomes {
            match outcome {
                TrackOutcome::Updated(update) => {
                    updated += 1;
                    let t = trajectory(*id, frame).tvec;
                    let truth = glam::Vec3::new(t.x as f32, -t.y as f32, t.z as f32);
                    sum_err += update.pose.position.distance(truth) as f64;
                    log::debug!(
                        "frame {frame} marker {id}: {:?} at {:.3?}",
                        update.method,
                        update.pose.position
                    );
                }
                TrackOutcome::Skipped(reason) => {
                    skipped += 1;
                    log::info!("frame {frame} marker {id}: skipped ({reason:?})");
                }
            }
        }
        for id in &report.lost {
            log::info!("frame {frame} marker {id}: hidden");
        }
    }

    println!(
        "{} frames, {updated} updates, {skipped} skipped, mean position error {:.4} m",
        args.frames,
        if updated > 0 { sum_err / updated as f64 } else { 0.0 }
    );

    let finals: Vec<(u32, PoseData)> = (0..args.markers)
        .filter_map(|id| {
            let entity = tracker.registry().get(&id)?;
            entity.filter().previous().map(|p| (id, *p))
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&finals)?);

    Ok(())
}
