// Fusion scheduler
//
// Merges the position, speed and steering streams in timestamp order and
// threads a single estimate through the predictor and corrector. The run
// covers only the time range common to all three streams: it stops as soon
// as any of them runs dry.

use std::fmt;

use tracing::{debug, error, info};

use crate::error::{Fault, FilterError};
use crate::filter::PoseFilter;
use crate::kalman::StateEstimate;
use crate::model::{ControlInput, NoiseMatrices, NoiseModel};
use crate::params::{FilterParams, StreamPriority};
use crate::sensors::{
    PositionFix, SensorEvent, SensorRecord, SensorStream, SpeedSample, SteeringSample, StreamKind,
};
use crate::trajectory::FilterTrajectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    /// One of the streams ran out of records
    Exhausted,
    /// A record or a filter step failed; no further steps are taken
    Faulted,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Exhausted => write!(f, "exhausted"),
            SchedulerState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Result of a successful step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// A record was processed and its estimate appended
    Advanced { timestamp: f64, stream: StreamKind },
    Exhausted,
}

/// What a finished run hands back
#[derive(Debug, Clone)]
pub struct RunReport {
    pub trajectory: FilterTrajectory,
    pub state: SchedulerState,
    /// Set when `state` is `Faulted`
    pub fault: Option<Fault>,
    pub records_processed: usize,
}

impl RunReport {
    pub fn is_faulted(&self) -> bool {
        self.state == SchedulerState::Faulted
    }
}

/// Single-threaded state machine over three timestamp-ordered streams
pub struct FusionScheduler<P, S, T>
where
    P: Iterator<Item = PositionFix>,
    S: Iterator<Item = SpeedSample>,
    T: Iterator<Item = SteeringSample>,
{
    filter: PoseFilter,
    noise_model: NoiseModel,
    noise: NoiseMatrices,
    priority: StreamPriority,

    positions: SensorStream<P>,
    speeds: SensorStream<S>,
    steering: SensorStream<T>,

    estimate: StateEstimate,
    control: ControlInput,
    last_timestamp: f64,

    state: SchedulerState,
    fault: Option<Fault>,
    trajectory: FilterTrajectory,
    records_processed: usize,
}

impl<P, S, T> FusionScheduler<P, S, T>
where
    P: Iterator<Item = PositionFix>,
    S: Iterator<Item = SpeedSample>,
    T: Iterator<Item = SteeringSample>,
{
    /// Create a scheduler starting from an explicit initial estimate
    pub fn new<IP, IS, IT>(
        params: &FilterParams,
        initial: StateEstimate,
        positions: IP,
        speeds: IS,
        steering: IT,
    ) -> Result<Self, FilterError>
    where
        IP: IntoIterator<IntoIter = P>,
        IS: IntoIterator<IntoIter = S>,
        IT: IntoIterator<IntoIter = T>,
    {
        Self::with_streams(
            params,
            initial,
            SensorStream::new(positions),
            SensorStream::new(speeds),
            SensorStream::new(steering),
        )
    }

    /// Create a scheduler whose initial mean is the first position fix,
    /// with zero heading and the configured initial covariance.
    ///
    /// The first fix is still processed as a regular record.
    pub fn from_first_fix<IP, IS, IT>(
        params: &FilterParams,
        positions: IP,
        speeds: IS,
        steering: IT,
    ) -> Result<Self, FilterError>
    where
        IP: IntoIterator<IntoIter = P>,
        IS: IntoIterator<IntoIter = S>,
        IT: IntoIterator<IntoIter = T>,
    {
        let mut positions = SensorStream::new(positions);
        let first = positions.peek().copied();
        let initial = match first {
            Some(fix) => {
                fix.validate()?;
                params.initial_estimate(&fix)?
            }
            None => {
                debug!("Position stream empty, starting from origin");
                StateEstimate::from_position(0.0, 0.0, &params.initial_covariance)?
            }
        };
        Self::with_streams(
            params,
            initial,
            positions,
            SensorStream::new(speeds),
            SensorStream::new(steering),
        )
    }

    fn with_streams(
        params: &FilterParams,
        initial: StateEstimate,
        positions: SensorStream<P>,
        speeds: SensorStream<S>,
        steering: SensorStream<T>,
    ) -> Result<Self, FilterError> {
        params.validate()?;
        Ok(Self {
            filter: PoseFilter::from_params(params)?,
            noise_model: params.noise_model()?,
            noise: params.noise_matrices()?,
            priority: params.priority,
            positions,
            speeds,
            steering,
            estimate: initial,
            control: ControlInput::default(),
            last_timestamp: params.run_start,
            state: SchedulerState::Running,
            fault: None,
            trajectory: FilterTrajectory::new(),
            records_processed: 0,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn estimate(&self) -> &StateEstimate {
        &self.estimate
    }

    pub fn control(&self) -> ControlInput {
        self.control
    }

    pub fn noise(&self) -> &NoiseMatrices {
        &self.noise
    }

    pub fn last_timestamp(&self) -> f64 {
        self.last_timestamp
    }

    pub fn trajectory(&self) -> &FilterTrajectory {
        &self.trajectory
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Process the earliest pending record.
    ///
    /// Once exhausted, keeps returning `Exhausted`; once faulted, keeps
    /// returning the original fault.
    pub fn step(&mut self) -> Result<StepOutcome, Fault> {
        match self.state {
            SchedulerState::Running => {}
            SchedulerState::Exhausted => return Ok(StepOutcome::Exhausted),
            SchedulerState::Faulted => {
                if let Some(fault) = &self.fault {
                    return Err(fault.clone());
                }
                return Ok(StepOutcome::Exhausted);
            }
        }

        let event = match self.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.state = SchedulerState::Exhausted;
                info!(
                    records = self.records_processed,
                    last_timestamp = self.last_timestamp,
                    "Sensor stream exhausted, stopping"
                );
                return Ok(StepOutcome::Exhausted);
            }
            Err(fault) => return Err(self.halt(fault)),
        };

        let timestamp = event.timestamp();
        let stream = event.kind();
        let dt = timestamp - self.last_timestamp;

        let estimate = match self.apply(event, dt) {
            Ok(estimate) => estimate,
            Err(fault) => return Err(self.halt(fault)),
        };

        debug!(
            timestamp,
            stream = %stream,
            dt,
            x = estimate.x(),
            y = estimate.y(),
            heading = estimate.heading(),
            "Processed record"
        );

        self.estimate = estimate.clone();
        self.last_timestamp = timestamp;
        self.trajectory.push(timestamp, estimate);
        self.records_processed += 1;

        Ok(StepOutcome::Advanced { timestamp, stream })
    }

    /// Step until exhausted or faulted
    pub fn run(mut self) -> RunReport {
        info!(
            run_start = self.last_timestamp,
            wheelbase = self.filter.model.wheelbase,
            priority = %self.priority,
            "Starting fusion run"
        );

        while let Ok(StepOutcome::Advanced { .. }) = self.step() {}

        info!(
            state = %self.state,
            records = self.records_processed,
            estimates = self.trajectory.len(),
            "Fusion run finished"
        );

        RunReport {
            trajectory: self.trajectory,
            state: self.state,
            fault: self.fault,
            records_processed: self.records_processed,
        }
    }

    /// Stream whose next record comes first, with its timestamp.
    ///
    /// `None` if any stream is out of records.
    fn select_next(&mut self) -> Result<Option<(StreamKind, f64)>, Fault> {
        let heads = [
            (StreamKind::Position, self.positions.peek_timestamp()),
            (StreamKind::Speed, self.speeds.peek_timestamp()),
            (StreamKind::Steering, self.steering.peek_timestamp()),
        ];

        let mut best: Option<(StreamKind, f64)> = None;
        for (kind, head) in heads {
            let timestamp = match head {
                Some(t) => t,
                None => return Ok(None),
            };
            if !timestamp.is_finite() {
                let error = FilterError::malformed(kind, format!("timestamp is not finite ({})", timestamp));
                return Err(self.fault_at(timestamp, kind, self.estimate.clone(), error));
            }
            let wins = match best {
                None => true,
                Some((best_kind, best_time)) => {
                    timestamp < best_time
                        || (timestamp == best_time && self.priority.rank(kind) < self.priority.rank(best_kind))
                }
            };
            if wins {
                best = Some((kind, timestamp));
            }
        }
        Ok(best)
    }

    fn next_event(&mut self) -> Result<Option<SensorEvent>, Fault> {
        let (kind, timestamp) = match self.select_next()? {
            Some(next) => next,
            None => return Ok(None),
        };

        let consumed = match kind {
            StreamKind::Position => self.positions.consume().map(|r| r.map(SensorRecord::into_event)),
            StreamKind::Speed => self.speeds.consume().map(|r| r.map(SensorRecord::into_event)),
            StreamKind::Steering => self.steering.consume().map(|r| r.map(SensorRecord::into_event)),
        };

        match consumed {
            None => Ok(None),
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(error)) => Err(self.fault_at(timestamp, kind, self.estimate.clone(), error)),
        }
    }

    /// Update controls or noise from the record and run the filter
    fn apply(&mut self, event: SensorEvent, dt: f64) -> Result<StateEstimate, Fault> {
        let timestamp = event.timestamp();
        let kind = event.kind();

        match event {
            SensorEvent::Position(fix) => {
                self.noise.measurement = self.noise_model.measurement_covariance(fix.accuracy);
                let predicted = self.predict(timestamp, kind, dt)?;
                self.filter
                    .correct_fix(&predicted, &fix, &self.noise.measurement)
                    .map_err(|e| self.fault_at(timestamp, kind, predicted.clone(), e))
            }
            SensorEvent::Speed(sample) => {
                self.control.speed = sample.speed;
                self.predict(timestamp, kind, dt)
            }
            SensorEvent::Steering(sample) => {
                self.control.steering = sample.angle.to_radians();
                self.predict(timestamp, kind, dt)
            }
        }
    }

    fn predict(&self, timestamp: f64, kind: StreamKind, dt: f64) -> Result<StateEstimate, Fault> {
        self.filter
            .predict(&self.estimate, &self.noise.process, self.control, dt)
            .map_err(|e| self.fault_at(timestamp, kind, self.estimate.clone(), e))
    }

    fn fault_at(&self, timestamp: f64, stream: StreamKind, estimate: StateEstimate, source: FilterError) -> Fault {
        Fault { timestamp, stream, estimate, source }
    }

    fn halt(&mut self, fault: Fault) -> Fault {
        error!(
            timestamp = fault.timestamp,
            stream = %fault.stream,
            mean = ?fault.estimate.mean.as_slice(),
            "Filter faulted: {}",
            fault.source
        );
        self.state = SchedulerState::Faulted;
        self.fault = Some(fault.clone());
        fault
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};

    fn params() -> FilterParams {
        FilterParams {
            wheelbase: 1.0,
            ..Default::default()
        }
    }

    fn fix(timestamp: f64, x: f64, y: f64) -> PositionFix {
        PositionFix { timestamp, x, y, accuracy: 200.0 }
    }

    fn speed(timestamp: f64, speed: f64) -> SpeedSample {
        SpeedSample { timestamp, speed }
    }

    fn steer(timestamp: f64, angle: f64) -> SteeringSample {
        SteeringSample { timestamp, angle }
    }

    #[test]
    fn test_timestamp_order_and_tie_break() {
        let mut scheduler = FusionScheduler::from_first_fix(
            &params(),
            vec![fix(0.0, 0.0, 0.0), fix(1.0, 0.0, 0.0), fix(9.0, 0.0, 0.0)],
            vec![speed(0.0, 0.0), speed(0.5, 0.0), speed(9.0, 0.0)],
            vec![steer(0.0, 0.0), steer(1.0, 0.0), steer(9.0, 0.0)],
        )
        .unwrap();

        let mut order = Vec::new();
        for _ in 0..5 {
            match scheduler.step().unwrap() {
                StepOutcome::Advanced { timestamp, stream } => order.push((timestamp, stream)),
                StepOutcome::Exhausted => break,
            }
        }

        assert_eq!(
            order,
            vec![
                (0.0, StreamKind::Position),
                (0.0, StreamKind::Speed),
                (0.0, StreamKind::Steering),
                (0.5, StreamKind::Speed),
                (1.0, StreamKind::Position),
            ]
        );
    }

    #[test]
    fn test_custom_priority() {
        let params = FilterParams {
            priority: "steering,speed,position".parse().unwrap(),
            ..params()
        };
        let mut scheduler = FusionScheduler::from_first_fix(
            &params,
            vec![fix(0.0, 0.0, 0.0), fix(5.0, 0.0, 0.0)],
            vec![speed(0.0, 0.0), speed(5.0, 0.0)],
            vec![steer(0.0, 0.0), steer(5.0, 0.0)],
        )
        .unwrap();

        let first = scheduler.step().unwrap();
        assert_eq!(first, StepOutcome::Advanced { timestamp: 0.0, stream: StreamKind::Steering });
    }

    #[test]
    fn test_controls_persist_and_convert_degrees() {
        let mut scheduler = FusionScheduler::from_first_fix(
            &params(),
            vec![fix(5.0, 0.0, 0.0)],
            vec![speed(1.0, 2.5), speed(6.0, 0.0)],
            vec![steer(2.0, 30.0), steer(6.0, 0.0)],
        )
        .unwrap();

        scheduler.step().unwrap(); // speed at 1.0
        assert_eq!(scheduler.control().speed, 2.5);
        assert_eq!(scheduler.control().steering, 0.0);

        scheduler.step().unwrap(); // steering at 2.0
        assert_eq!(scheduler.control().speed, 2.5);
        assert!((scheduler.control().steering - std::f64::consts::FRAC_PI_6).abs() < 1e-12);
        assert_eq!(scheduler.last_timestamp(), 2.0);
    }

    #[test]
    fn test_first_dt_measured_from_run_start() {
        let params = FilterParams { run_start: -1.0, ..params() };
        let initial = StateEstimate::new(
            DVector::zeros(3),
            DMatrix::from_diagonal(&DVector::from_vec(vec![0.01, 0.01, 1e-12])),
        )
        .unwrap();
        let mut scheduler = FusionScheduler::new(
            &params,
            initial,
            vec![fix(5.0, 10.0, 0.0)],
            vec![speed(0.0, 2.0), speed(5.0, 2.0)],
            vec![steer(5.0, 0.0)],
        )
        .unwrap();
        assert_eq!(scheduler.last_timestamp(), -1.0);

        let outcome = scheduler.step().unwrap();
        assert_eq!(outcome, StepOutcome::Advanced { timestamp: 0.0, stream: StreamKind::Speed });

        // One second at 2 m/s heading east
        let est = scheduler.estimate();
        assert!((est.x() - 2.0).abs() < 1e-9);
        assert!(est.y().abs() < 1e-12);
        let q = &params.process_noise;
        assert!((est.covariance[(0, 0)] - (0.01 + q[0])).abs() < 1e-9);
        assert!(est.covariance[(1, 1)] > 0.01 + q[1]);
        assert_eq!(scheduler.last_timestamp(), 0.0);
    }

    #[test]
    fn test_record_before_run_start_only_adds_process_noise() {
        let params = FilterParams { run_start: 5.0, ..params() };
        let initial = StateEstimate::from_position(1.0, 2.0, &[0.5, 0.5, 0.1]).unwrap();
        let mut scheduler = FusionScheduler::new(
            &params,
            initial.clone(),
            vec![fix(8.0, 1.0, 2.0)],
            vec![speed(2.0, 1.0), speed(8.0, 1.0)],
            vec![steer(8.0, 0.0)],
        )
        .unwrap();

        // dt = 2 - 5 is negative: no motion
        scheduler.step().unwrap();
        let est = scheduler.estimate();
        for i in 0..3 {
            assert!((est.mean[i] - initial.mean[i]).abs() < 1e-12);
        }
        let expected = &initial.covariance + &scheduler.noise().process;
        assert!((&est.covariance - expected).amax() < 1e-12);
    }

    #[test]
    fn test_exhausts_when_any_stream_empty() {
        let scheduler = FusionScheduler::from_first_fix(
            &params(),
            vec![fix(0.0, 0.0, 0.0), fix(1.0, 1.0, 0.0), fix(2.0, 2.0, 0.0)],
            vec![speed(0.0, 1.0), speed(0.5, 1.0)],
            vec![steer(0.0, 0.0), steer(3.0, 0.0)],
        )
        .unwrap();

        let report = scheduler.run();
        assert_eq!(report.state, SchedulerState::Exhausted);
        assert!(report.fault.is_none());
        // fix 0, speed 0, steer 0, speed 0.5, then speed stream is empty
        assert_eq!(report.records_processed, 4);
        assert_eq!(report.trajectory.len(), 4);
        assert_eq!(report.trajectory.last().unwrap().timestamp, 0.5);
    }

    #[test]
    fn test_empty_stream_exhausts_immediately() {
        let mut scheduler = FusionScheduler::from_first_fix(
            &params(),
            Vec::<PositionFix>::new(),
            vec![speed(0.0, 1.0)],
            vec![steer(0.0, 0.0)],
        )
        .unwrap();

        assert_eq!(scheduler.step().unwrap(), StepOutcome::Exhausted);
        assert_eq!(scheduler.state(), SchedulerState::Exhausted);
        assert_eq!(scheduler.step().unwrap(), StepOutcome::Exhausted);
        assert!(scheduler.trajectory().is_empty());
    }

    #[test]
    fn test_position_fix_sets_measurement_noise() {
        let mut scheduler = FusionScheduler::from_first_fix(
            &params(),
            vec![fix(0.0, 0.0, 0.0), fix(1.0, 0.0, 0.0)],
            vec![speed(1.0, 0.0)],
            vec![steer(1.0, 0.0)],
        )
        .unwrap();

        scheduler.step().unwrap();
        // accuracy 200 mm with divisor 2 gives sigma 0.1 m
        assert!((scheduler.noise().measurement[(0, 0)] - 0.01).abs() < 1e-15);
        assert!((scheduler.noise().measurement[(1, 1)] - 0.01).abs() < 1e-15);
    }

    #[test]
    fn test_malformed_record_faults_and_keeps_partial_trajectory() {
        let scheduler = FusionScheduler::from_first_fix(
            &params(),
            vec![fix(0.0, 0.0, 0.0), fix(1.0, f64::NAN, 0.0), fix(2.0, 2.0, 0.0)],
            vec![speed(0.0, 1.0), speed(3.0, 1.0)],
            vec![steer(0.0, 0.0), steer(3.0, 0.0)],
        )
        .unwrap();

        let report = scheduler.run();
        assert!(report.is_faulted());
        assert_eq!(report.trajectory.len(), 3);

        let fault = report.fault.unwrap();
        assert_eq!(fault.timestamp, 1.0);
        assert_eq!(fault.stream, StreamKind::Position);
        assert!(matches!(fault.source, FilterError::MalformedRecord { .. }));
    }

    #[test]
    fn test_faulted_scheduler_refuses_further_steps() {
        let mut scheduler = FusionScheduler::from_first_fix(
            &params(),
            vec![fix(0.0, 0.0, 0.0)],
            vec![speed(f64::NAN, 1.0)],
            vec![steer(0.0, 0.0)],
        )
        .unwrap();

        let first = scheduler.step().unwrap_err();
        assert_eq!(scheduler.state(), SchedulerState::Faulted);
        let second = scheduler.step().unwrap_err();
        assert_eq!(first.timestamp.is_nan(), second.timestamp.is_nan());
        assert_eq!(second.stream, StreamKind::Speed);
        assert!(scheduler.trajectory().is_empty());
    }

    #[test]
    fn test_non_psd_initial_covariance_faults() {
        let bad = StateEstimate {
            mean: DVector::zeros(3),
            covariance: DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, -1.0, 0.1])),
        };
        let scheduler = FusionScheduler::new(
            &params(),
            bad,
            vec![fix(0.0, 0.0, 0.0)],
            vec![speed(0.0, 1.0)],
            vec![steer(0.0, 0.0)],
        )
        .unwrap();

        let report = scheduler.run();
        assert!(report.is_faulted());
        assert!(report.trajectory.is_empty());
        let fault = report.fault.unwrap();
        assert!(fault.source.is_numerical());
        assert_eq!(fault.estimate.covariance[(1, 1)], -1.0);
        assert!(fault.estimate.mean.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = FilterParams { wheelbase: -1.0, ..Default::default() };
        let result = FusionScheduler::from_first_fix(
            &params,
            vec![fix(0.0, 0.0, 0.0)],
            vec![speed(0.0, 1.0)],
            vec![steer(0.0, 0.0)],
        );
        assert!(result.is_err());
    }
}
