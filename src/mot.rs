//! MOT challenge text rows: `frame,id,left,top,width,height[,conf,x,y,z]`.
//!
//! Ground truth, expert results and offline feedback are all stored this
//! way. Detection files use the same layout with `-1` in the id column,
//! which is read as the class. MOT16/17 ground truth reuses columns 7 and 8
//! for the consider flag and the object class.

use std::io::BufRead;

use crate::bbox::BBox;
use crate::detection::Detection;
use crate::error::Error;
use crate::sequence::SeqInfo;
use crate::trajectory::{Trajectory, TrajectoryRow};

fn fields(line: &str) -> Vec<&str> {
    line.split(|c| c == ',' || c == ' ' || c == '\t')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_num<T: std::str::FromStr>(value: &str, line: usize, name: &str) -> Result<T, Error> {
    value.parse::<T>().map_err(|_| Error::Parse {
        line,
        reason: format!("bad {} `{}`", name, value),
    })
}

fn for_each_row<R, F>(reader: R, min_fields: usize, mut f: F) -> Result<(), Error>
where
    R: BufRead,
    F: FnMut(usize, &[&str]) -> Result<(), Error>,
{
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let cols = fields(line);
        if cols.len() < min_fields {
            return Err(Error::Parse {
                line: idx + 1,
                reason: format!("expected at least {} fields, got {}", min_fields, cols.len()),
            });
        }

        f(idx + 1, &cols)?;
    }

    Ok(())
}

// frames and ids are sometimes written as floats ("1.0")
fn parse_int(value: &str, line: usize, name: &str) -> Result<i64, Error> {
    match value.parse::<i64>() {
        Ok(v) => Ok(v),
        Err(_) => {
            let v: f64 = parse_num(value, line, name)?;
            if v.fract() != 0.0 {
                return Err(Error::Parse {
                    line,
                    reason: format!("bad {} `{}`", name, value),
                });
            }
            Ok(v as i64)
        }
    }
}

fn parse_frame(value: &str, line: usize) -> Result<u32, Error> {
    let frame = parse_int(value, line, "frame")?;

    u32::try_from(frame)
        .ok()
        .filter(|f| *f > 0)
        .ok_or_else(|| Error::Parse {
            line,
            reason: format!("frame must be positive, got {}", frame),
        })
}

const PEDESTRIAN: i64 = 1;

fn read_rows<R, K>(reader: R, mut keep: K) -> Result<Trajectory, Error>
where
    R: BufRead,
    K: FnMut(usize, &[&str]) -> Result<bool, Error>,
{
    let mut rows = Vec::new();

    for_each_row(reader, 6, |line, cols| {
        if !keep(line, cols)? {
            return Ok(());
        }

        let frame = parse_frame(cols[0], line)?;
        let track_id = parse_int(cols[1], line, "id")? as i32;
        let x = parse_num(cols[2], line, "left")?;
        let y = parse_num(cols[3], line, "top")?;
        let w = parse_num(cols[4], line, "width")?;
        let h = parse_num(cols[5], line, "height")?;

        rows.push(TrajectoryRow {
            frame,
            track_id,
            bbox: BBox::ltwh(x, y, w, h),
        });

        Ok(())
    })?;

    Ok(Trajectory::from_rows(rows))
}

pub fn read_trajectory<R: BufRead>(reader: R) -> Result<Trajectory, Error> {
    read_rows(reader, |_, _| Ok(true))
}

/// Reads ground truth the way it is scored for `seq_info`. On MOT16/17 rows
/// with `consider == 0` or a known class other than pedestrian are dropped, other
/// datasets keep every row.
pub fn read_ground_truth<R: BufRead>(reader: R, seq_info: &SeqInfo) -> Result<Trajectory, Error> {
    if !seq_info.is_mot_challenge() {
        return read_trajectory(reader);
    }

    let mut dropped = 0usize;
    let gt = read_rows(reader, |line, cols| {
        if cols.len() < 8 {
            return Ok(true);
        }

        let consider = parse_num::<f32>(cols[6], line, "consider flag")? != 0.0;
        let class = parse_int(cols[7], line, "class")?;
        // results-style rows write -1 for the class
        let keep = consider && (class == PEDESTRIAN || class == -1);
        dropped += (!keep) as usize;

        Ok(keep)
    })?;

    tracing::debug!(
        dataset = %seq_info.dataset_name,
        kept = gt.len(),
        dropped,
        "ground truth filtered"
    );

    Ok(gt)
}

pub fn read_detections<R: BufRead>(reader: R) -> Result<Vec<Detection>, Error> {
    let mut dets = Vec::new();

    for_each_row(reader, 7, |line, cols| {
        dets.push(Detection {
            frame: parse_frame(cols[0], line)?,
            class: parse_int(cols[1], line, "class")? as i32,
            x: parse_num(cols[2], line, "left")?,
            y: parse_num(cols[3], line, "top")?,
            w: parse_num(cols[4], line, "width")?,
            h: parse_num(cols[5], line, "height")?,
            confidence: parse_num(cols[6], line, "confidence")?,
        });

        Ok(())
    })?;

    dets.sort_by_key(|d| d.frame);

    Ok(dets)
}

/// Splits frame-sorted detections into `frames` buckets, frame `i + 1` at
/// index `i`. Detections past `frames` are dropped.
pub fn group_detections(dets: &[Detection], frames: usize) -> Vec<Vec<Detection>> {
    let mut out: Vec<Vec<Detection>> = (0..frames).map(|_| vec![]).collect();
    for d in dets {
        let idx = (d.frame as usize).checked_sub(1);
        if let Some(bucket) = idx.and_then(|i| out.get_mut(i)) {
            bucket.push(*d);
        }
    }

    out
}

pub fn format_trajectory(t: &Trajectory) -> String {
    let mut out = String::with_capacity(t.len() * 48);
    for r in t.iter() {
        let [x, y, w, h] = *r.bbox.as_slice();
        out.push_str(&format!(
            "{},{},{:.2},{:.2},{:.2},{:.2},1,-1,-1,-1\n",
            r.frame, r.track_id, x, y, w, h
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ClearMotScorer, LossKind, LossScorer};

    const GT: &str = "\
# frame,id,x,y,w,h,conf,x,y,z
1,1,10,20,30,40,1,-1,-1,-1
1,2,100,20,30,40,1,-1,-1,-1

2.0,1.0,12,20,30,40,1,-1,-1,-1
";

    #[test]
    fn test_read_trajectory() {
        let t = read_trajectory(GT.as_bytes()).unwrap();

        assert_eq!(t.len(), 3);
        assert_eq!(t.frames(), Some(1..=2));
        assert_eq!(t.frame(2)[0].bbox.left(), 12.0);
    }

    #[test]
    fn test_read_detections_and_group() {
        let src = "2,-1,1,2,3,4,0.9\n1,-1,5,6,7,8,0.5\n";
        let dets = read_detections(src.as_bytes()).unwrap();

        assert_eq!(dets[0].frame, 1);
        assert_eq!(dets[1].confidence, 0.9);

        let grouped = group_detections(&dets, 3);
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[1].len(), 1);
        assert!(grouped[2].is_empty());
    }

    #[test]
    fn test_malformed_rows_are_reported() {
        let err = read_trajectory("1,1,10,20\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));

        let err = read_trajectory("1,1,10,20,abc,5\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));

        let err = read_trajectory("0,1,10,20,5,5\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));
    }

    const MOT17_GT: &str = "\
1,1,10,20,30,40,1,1,0.9
1,2,100,20,30,40,0,1,0.2
1,3,200,20,30,40,1,7,1.0
2,1,12,20,30,40,1,1,0.9
2,4,300,20,30,40,1,3,1.0
";

    #[test]
    fn test_mot17_ground_truth_keeps_considered_pedestrians() {
        let gt = read_ground_truth(MOT17_GT.as_bytes(), &SeqInfo::new("MOT17", "MOT17-02")).unwrap();

        assert_eq!(gt.len(), 2);
        assert!(gt.iter().all(|r| r.track_id == 1));
    }

    #[test]
    fn test_other_datasets_keep_every_row() {
        let gt = read_ground_truth(MOT17_GT.as_bytes(), &SeqInfo::new("ETH", "ETH-Bahnhof")).unwrap();
        assert_eq!(gt.len(), 5);

        // rows in the results layout carry no class and are kept
        let gt = read_ground_truth(GT.as_bytes(), &SeqInfo::new("MOT16", "MOT16-04")).unwrap();
        assert_eq!(gt.len(), 3);
    }

    #[test]
    fn test_ignored_ground_truth_is_not_a_miss() {
        let seq = SeqInfo::new("MOT17", "MOT17-02");
        let gt = read_ground_truth(MOT17_GT.as_bytes(), &seq).unwrap();
        // the expert only tracks the considered pedestrian
        let expert = read_trajectory("1,5,10,20,30,40\n2,5,12,20,30,40\n".as_bytes()).unwrap();

        let scorer = ClearMotScorer::default();
        assert_eq!(scorer.summarize(&gt, &expert).num_misses, 0);
        assert_eq!(scorer.score(&gt, &expert, &seq, LossKind::Mota), 0.0);

        let unfiltered = read_trajectory(MOT17_GT.as_bytes()).unwrap();
        assert_eq!(scorer.summarize(&unfiltered, &expert).num_misses, 3);
    }

    #[test]
    fn test_format_then_read() {
        let t = read_trajectory(GT.as_bytes()).unwrap();
        let text = format_trajectory(&t);

        assert_eq!(read_trajectory(text.as_bytes()).unwrap(), t);
    }
}
