use log::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stereo_core::CameraId;
use stereo_locate::{Frame, LocatorSettings, StereoLocator};
use structopt::StructOpt;

#[derive(StructOpt, Clone)]
#[structopt(
    name = "stereo-locate",
    about = "Calibrates a stereo pair from recorded frames of a marker and localizes it"
)]
struct Opt {
    /// The file where settings are specified.
    ///
    /// This is in the format of `stereo_locate::LocatorSettings`. Defaults are used if it
    /// doesn't exist.
    #[structopt(short, long, default_value = "stereo-settings.json")]
    settings: PathBuf,
    /// The number of synchronized frame pairs captured as calibration samples.
    #[structopt(short, long, default_value = "20")]
    calibration_frames: usize,
    /// How long to wait for the detection of a frame, in milliseconds.
    #[structopt(long, default_value = "1000")]
    timeout: u64,
    /// Directory of frames from the first camera, paired with the second by file name order.
    #[structopt(parse(from_os_str))]
    first: PathBuf,
    /// Directory of frames from the second camera.
    #[structopt(parse(from_os_str))]
    second: PathBuf,
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();
    if let Err(e) = run(&opt) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn frame_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.retain(|path| path.is_file());
    paths.sort();
    Ok(paths)
}

/// Adds the latest detections as a calibration sample. Returns whether the frame was used.
fn capture_calibration_frame(locator: &StereoLocator, sequence: u64) -> bool {
    match locator.capture_sample() {
        Ok(count) => {
            debug!("frame {}: {} calibration samples", sequence, count);
            true
        }
        Err(e) => {
            warn!("frame {}: not used for calibration: {}", sequence, e);
            false
        }
    }
}

fn run(opt: &Opt) -> Result<(), Box<dyn std::error::Error>> {
    let settings = LocatorSettings::load_or_default(&opt.settings);
    let locator = StereoLocator::new(&settings)?;
    let timeout = Duration::from_millis(opt.timeout);

    let first_paths = frame_paths(&opt.first)?;
    let second_paths = frame_paths(&opt.second)?;
    if first_paths.len() != second_paths.len() {
        warn!(
            "{} frames for camera 1 and {} for camera 2, extra frames are ignored",
            first_paths.len(),
            second_paths.len()
        );
    }

    let (first_tx, first_rx) = crossbeam_channel::bounded(1);
    let (second_tx, second_rx) = crossbeam_channel::bounded(1);
    let workers = [
        locator.spawn_worker(CameraId::First, first_rx)?,
        locator.spawn_worker(CameraId::Second, second_rx)?,
    ];

    let mut calibration_attempted = false;
    let mut rejected = 0;
    for (sequence, (first, second)) in first_paths.iter().zip(&second_paths).enumerate() {
        let sequence = sequence as u64;
        let (first_image, second_image) = match (image::open(first), image::open(second)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                warn!("skipping frame {}: {}", sequence, e);
                continue;
            }
        };
        first_tx.send(Frame {
            sequence,
            image: first_image,
        })?;
        second_tx.send(Frame {
            sequence,
            image: second_image,
        })?;
        let reports = (
            locator.wait_sequence(CameraId::First, sequence, timeout),
            locator.wait_sequence(CameraId::Second, sequence, timeout),
        );
        if !matches!(reports, (Some(a), Some(b)) if a.sequence == sequence && b.sequence == sequence) {
            warn!("no synchronized detections for frame {}", sequence);
            continue;
        }

        if (sequence as usize) < opt.calibration_frames {
            if !capture_calibration_frame(&locator, sequence) {
                rejected += 1;
            }
            continue;
        }
        if !calibration_attempted {
            calibration_attempted = true;
            info!("{} calibration frames were not usable", rejected);
            locator.log_samples();
            if let Err(e) = locator.calibrate() {
                error!("unable to calibrate: {}", e);
                break;
            }
        }
        match locator.triangulate_latest() {
            Some(Ok(point)) => println!("{} {} {} {}", sequence, point.x, point.y, point.z),
            Some(Err(e)) => warn!("frame {}: {}", sequence, e),
            None => debug!("frame {}: marker not seen by both cameras", sequence),
        }
    }

    if !calibration_attempted && locator.sample_count() > 0 {
        locator.log_samples();
        if let Err(e) = locator.calibrate() {
            error!("unable to calibrate: {}", e);
        }
    }

    drop(first_tx);
    drop(second_tx);
    for worker in workers {
        let camera = worker.camera();
        match worker.join() {
            Ok(frames) => info!("{} processed {} frames", camera, frames),
            Err(_) => error!("detection worker of {} panicked", camera),
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use stereo_core::KeyPoint;
    use stereo_locate::Detection;

    #[test]
    fn calibration_frames_report_rejection() {
        let locator = StereoLocator::new(&LocatorSettings::default()).unwrap();
        assert!(!capture_calibration_frame(&locator, 0));

        locator.report_detection(CameraId::First, Detection::Single(KeyPoint::new(320.0, 240.0)));
        locator.report_detection(CameraId::Second, Detection::Empty);
        assert!(!capture_calibration_frame(&locator, 1));
        assert_eq!(locator.sample_count(), 0);

        locator.report_detection(CameraId::Second, Detection::Single(KeyPoint::new(300.0, 240.0)));
        assert!(capture_calibration_frame(&locator, 2));
        assert_eq!(locator.sample_count(), 1);
    }
}
