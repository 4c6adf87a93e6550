//! Textual track files.
//!
//! The first line is the version header, followed by one tab-separated line per
//! observation:
//!
//! ```text
//! shot  track  feature_id  x  y  scale  r  g  b  segmentation  instance  depth  depth_is_radial  depth_std
//! ```
//!
//! Absent optional values are written as `-`. Floats use the shortest decimal
//! representation that parses back to the same value, so files round-trip exactly.

use crate::{Depth, Observation, TracksError, TracksManager};
use core::fmt::Display;
use core::str::FromStr;
use cv_core::nalgebra::Point2;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const TRACKS_HEADER: &str = "CV_SFM_TRACKS_v1";
const ABSENT: &str = "-";
const NUM_COLUMNS: usize = 14;

fn check_id(id: &str) -> Result<&str, TracksError> {
    if id.contains(|c: char| matches!(c, '\t' | '\n' | '\r')) {
        Err(TracksError::InvalidId(id.to_owned()))
    } else {
        Ok(id)
    }
}

fn optional<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| ABSENT.to_owned(), |v| v.to_string())
}

struct Row<'a> {
    line: usize,
    fields: Vec<&'a str>,
}

impl<'a> Row<'a> {
    fn parse<T: FromStr>(&self, column: usize, name: &str) -> Result<T, TracksError> {
        self.fields[column].parse().map_err(|_| TracksError::Parse {
            line: self.line,
            reason: format!("invalid {} `{}`", name, self.fields[column]),
        })
    }

    fn parse_optional<T: FromStr>(&self, column: usize, name: &str) -> Result<Option<T>, TracksError> {
        if self.fields[column] == ABSENT {
            Ok(None)
        } else {
            self.parse(column, name).map(Some)
        }
    }

    fn observation(&self) -> Result<Observation, TracksError> {
        let mut observation = Observation::new(
            Point2::new(self.parse(3, "x")?, self.parse(4, "y")?),
            self.parse(5, "scale")?,
            [
                self.parse(6, "red")?,
                self.parse(7, "green")?,
                self.parse(8, "blue")?,
            ],
            self.parse(2, "feature id")?,
        );
        observation.segmentation = self.parse_optional(9, "segmentation")?;
        observation.instance = self.parse_optional(10, "instance")?;
        observation.depth_prior = match self.parse_optional::<f64>(11, "depth")? {
            Some(value) => Some(Depth {
                value,
                is_radial: self.parse::<u8>(12, "depth radial flag")? != 0,
                std_deviation: self.parse(13, "depth deviation")?,
            }),
            None => None,
        };
        Ok(observation)
    }
}

impl TracksManager {
    /// Fails on the first shot or track id that cannot be written.
    fn check_ids(&self) -> Result<(), TracksError> {
        for (shot, tracks) in &self.tracks_per_shot {
            check_id(shot)?;
            for track in tracks.keys() {
                check_id(track)?;
            }
        }
        Ok(())
    }

    /// Writes every observation. Nothing is written if an id is invalid.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), TracksError> {
        self.check_ids()?;
        let mut writer = BufWriter::new(writer);
        writeln!(writer, "{}", TRACKS_HEADER)?;
        for (shot, tracks) in &self.tracks_per_shot {
            for (track, o) in tracks {
                let (depth, radial, std) = match o.depth_prior {
                    Some(d) => (
                        d.value.to_string(),
                        u8::from(d.is_radial).to_string(),
                        d.std_deviation.to_string(),
                    ),
                    None => (ABSENT.to_owned(), ABSENT.to_owned(), ABSENT.to_owned()),
                };
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    shot,
                    track,
                    o.feature_id,
                    o.point.x,
                    o.point.y,
                    o.scale,
                    o.color[0],
                    o.color[1],
                    o.color[2],
                    optional(o.segmentation),
                    optional(o.instance),
                    depth,
                    radial,
                    std,
                )?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub fn as_string(&self) -> Result<String, TracksError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        // Everything written is valid UTF-8.
        String::from_utf8(buffer).map_err(|e| TracksError::Parse {
            line: 0,
            reason: e.to_string(),
        })
    }

    /// Writes the tracks to a file. An existing file is left untouched if an id is invalid.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), TracksError> {
        self.check_ids()?;
        self.write_to(File::create(path)?)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, TracksError> {
        let mut lines = reader.lines();
        let header = lines.next().transpose()?.unwrap_or_default();
        if header.trim_end() != TRACKS_HEADER {
            return Err(TracksError::UnsupportedVersion(header));
        }
        let mut manager = Self::new();
        for (index, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let row = Row {
                line: index + 2,
                fields: line.split('\t').collect(),
            };
            if row.fields.len() != NUM_COLUMNS {
                return Err(TracksError::Parse {
                    line: row.line,
                    reason: format!(
                        "expected {} columns, found {}",
                        NUM_COLUMNS,
                        row.fields.len()
                    ),
                });
            }
            let observation = row.observation()?;
            manager.add_observation(row.fields[0], row.fields[1], observation);
        }
        Ok(manager)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TracksError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl FromStr for TracksManager {
    type Err = TracksError;

    fn from_str(s: &str) -> Result<Self, TracksError> {
        Self::from_reader(s.as_bytes())
    }
}
