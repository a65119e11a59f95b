use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::kalman::{HEADING, X, Y};
use crate::trajectory::{FilterTrajectory, TrajectoryPoint, TrajectoryRecord};

/// Trait for trajectory output handlers
pub trait OutputHandler {
    /// Handle one timestamped estimate
    fn handle_estimate(&mut self, point: &TrajectoryPoint) -> io::Result<()>;

    /// Flush anything buffered once the run is over
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Feed a whole trajectory through a set of handlers
pub fn write_trajectory(
    trajectory: &FilterTrajectory,
    handlers: &mut [Box<dyn OutputHandler>],
) -> io::Result<()> {
    for point in trajectory {
        for handler in handlers.iter_mut() {
            handler.handle_estimate(point)?;
        }
    }
    for handler in handlers.iter_mut() {
        handler.finish()?;
    }
    Ok(())
}

/// CSV output: one file with the pose, one with the covariance.
///
/// Both files carry the timestamp on every row, so rows pair up by line
/// number and by time.
pub struct CsvOutput<W: Write> {
    filter: W,
    covariance: W,
    header_written: bool,
}

impl CsvOutput<BufWriter<File>> {
    pub fn create(filter_path: impl AsRef<Path>, covariance_path: impl AsRef<Path>) -> io::Result<Self> {
        let filter = BufWriter::new(File::create(filter_path)?);
        let covariance = BufWriter::new(File::create(covariance_path)?);
        Ok(CsvOutput::new(filter, covariance))
    }
}

impl<W: Write> CsvOutput<W> {
    pub fn new(filter: W, covariance: W) -> Self {
        CsvOutput {
            filter,
            covariance,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> (W, W) {
        (self.filter, self.covariance)
    }

    fn write_headers(&mut self, dim: usize) -> io::Result<()> {
        writeln!(self.filter, "t,x,y,heading")?;
        let cells: Vec<String> = (0..dim)
            .flat_map(|i| (0..dim).map(move |j| format!("p{}{}", i, j)))
            .collect();
        writeln!(self.covariance, "t,{}", cells.join(","))?;
        self.header_written = true;
        Ok(())
    }
}

impl<W: Write> OutputHandler for CsvOutput<W> {
    fn handle_estimate(&mut self, point: &TrajectoryPoint) -> io::Result<()> {
        let est = &point.estimate;
        if !self.header_written {
            self.write_headers(est.dim())?;
        }

        // Format: t,x,y,heading
        writeln!(
            self.filter,
            "{:.6},{:.6},{:.6},{:.6}",
            point.timestamp, est.mean[X], est.mean[Y], est.mean[HEADING]
        )?;

        // Format: t,p00,p01,...,pnn (row-major)
        let record = TrajectoryRecord::from(point);
        let cells: Vec<String> = record.covariance.iter().map(|v| format!("{:e}", v)).collect();
        writeln!(self.covariance, "{:.6},{}", point.timestamp, cells.join(","))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.filter.flush()?;
        self.covariance.flush()
    }
}

/// JSON output: the whole trajectory as an array, written on finish
pub struct JsonOutput<W: Write> {
    writer: W,
    records: Vec<TrajectoryRecord>,
}

impl JsonOutput<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(JsonOutput::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonOutput<W> {
    pub fn new(writer: W) -> Self {
        JsonOutput {
            writer,
            records: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputHandler for JsonOutput<W> {
    fn handle_estimate(&mut self, point: &TrajectoryPoint) -> io::Result<()> {
        self.records.push(TrajectoryRecord::from(point));
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, &self.records)?;
        self.writer.flush()
    }
}
