// Pose fusion - Main Entry Point

use clap::Parser;
use pose_fusion::config::Config;
use pose_fusion::output::{self, CsvOutput, JsonOutput, OutputHandler};
use pose_fusion::scheduler::{FusionScheduler, RunReport};
use pose_fusion::simulate::SimulatedDrive;
use tracing::{error, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    let params = config.filter_params()?;
    let scenario = config.scenario();
    info!(
        duration = scenario.duration,
        speed = scenario.speed,
        noisy = scenario.noisy,
        "Simulating drive"
    );
    let drive = scenario.simulate()?;

    let scheduler = FusionScheduler::from_first_fix(
        &params,
        drive.positions.clone(),
        drive.speeds.clone(),
        drive.steering.clone(),
    )?;
    let report = scheduler.run();

    if let Some(last) = report.trajectory.last() {
        info!(
            t = last.timestamp,
            x = last.estimate.x(),
            y = last.estimate.y(),
            heading_deg = last.estimate.heading_degrees(),
            position_error = last.estimate.position_error(),
            "Final estimate"
        );
    }
    if let Some(rms) = rms_position_error(&report, &drive) {
        info!("RMS position error against ground truth: {:.3} m", rms);
    }

    write_outputs(&config, &report);

    match report.fault {
        Some(fault) => {
            error!("Run stopped early after {} records", report.records_processed);
            Err(fault.into())
        }
        None => Ok(()),
    }
}

/// Open every configured writer and feed it the trajectory
fn write_outputs(config: &Config, report: &RunReport) {
    let mut handlers: Vec<Box<dyn OutputHandler>> = Vec::new();

    // CSV Output
    for prefix in &config.write_csv {
        let filter_path = format!("{}-filter.csv", prefix);
        let covariance_path = format!("{}-covar.csv", prefix);
        info!("Writing CSV results to {} and {}", filter_path, covariance_path);
        match CsvOutput::create(&filter_path, &covariance_path) {
            Ok(csv_out) => handlers.push(Box::new(csv_out)),
            Err(e) => error!("Failed to open CSV output files for {}: {}", prefix, e),
        }
    }

    // JSON Output
    for filename in &config.write_json {
        info!("Writing JSON results to {}", filename);
        match JsonOutput::create(filename) {
            Ok(json_out) => handlers.push(Box::new(json_out)),
            Err(e) => error!("Failed to open JSON output file {}: {}", filename, e),
        }
    }

    if handlers.is_empty() {
        return;
    }
    if let Err(e) = output::write_trajectory(&report.trajectory, &mut handlers) {
        error!("Failed to write results: {}", e);
    }
}

/// Error of the first estimate at each fix time against the true pose
fn rms_position_error(report: &RunReport, drive: &SimulatedDrive) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for truth in &drive.truth {
        let Some(point) = report.trajectory.iter().find(|p| p.timestamp == truth.timestamp) else {
            continue;
        };
        let dx = point.estimate.x() - truth.state[0];
        let dy = point.estimate.y() - truth.state[1];
        sum += dx * dx + dy * dy;
        count += 1;
    }
    if count == 0 {
        warn!("No estimates coincide with ground-truth samples");
        return None;
    }
    Some((sum / count as f64).sqrt())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
