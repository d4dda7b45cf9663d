//! Plain-text matrix I/O: space-separated coefficients, one matrix row per
//! line. This is the surface the factorization core shares with its external
//! collaborators (benchmark drivers, result dumps); nothing in the core
//! depends on it.

use panqr_core::Mat;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub fn save_matrix(mat: &Mat, path: impl AsRef<Path>) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for i in 0..mat.nrows() {
        for j in 0..mat.ncols() {
            if j > 0 {
                out.write_all(b" ")?;
            }
            write!(out, "{}", mat[(i, j)])?;
        }
        out.write_all(b"\n")?;
    }
    out.flush()
}

pub fn load_matrix(path: impl AsRef<Path>) -> io::Result<Mat> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|err| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("line {}: bad coefficient {token:?}: {err}", lineno + 1),
                    )
                })
            })
            .collect::<io::Result<Vec<f64>>>()?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "line {}: expected {} coefficients, found {}",
                        lineno + 1,
                        first.len(),
                        row.len()
                    ),
                ));
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "matrix file holds no rows",
        ));
    }
    let (nrows, ncols) = (rows.len(), rows[0].len());
    Ok(Mat::from_fn(nrows, ncols, |i, j| rows[i][j]))
}
