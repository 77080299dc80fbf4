/*!
# Saving chains to CSV

Both functions write the long format `chain,sample,dim_0,dim_1,...`, one row per stored
state. Enable via the `csv` feature.
*/

use ndarray::{Array3, ArrayView2, Axis};
use std::error::Error;
use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::core::MultiChainResult;

fn write_header<W: std::io::Write>(wtr: &mut Writer<W>, n_dims: usize) -> csv::Result<()> {
    let mut header: Vec<String> = vec!["chain".to_string(), "sample".to_string()];
    header.extend((0..n_dims).map(|i| format!("dim_{}", i)));
    wtr.write_record(&header)
}

fn write_chain<W: std::io::Write, T: Display>(
    wtr: &mut Writer<W>,
    chain_idx: usize,
    draws: ArrayView2<T>,
) -> csv::Result<()> {
    for (sample_idx, sample) in draws.axis_iter(Axis(0)).enumerate() {
        let mut row = vec![chain_idx.to_string(), sample_idx.to_string()];
        row.extend(sample.iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }
    Ok(())
}

/**
Saves every chain of a run, including the stored prefix of chains that stopped early.

The `chain` column holds the chain's index in the run, so a failed chain shows up as a
shorter block rather than shifting the others.

# Examples

```rust
use mcmc_engine::core::{ChainRunner, Starts};
use mcmc_engine::distributions::{IsotropicGaussian, LogDensity};
use mcmc_engine::io::csv::save_csv;
use mcmc_engine::metropolis_hastings::MetropolisHastings;

let target = LogDensity(|x: &[f64]| -0.5 * x[0] * x[0]);
let proposal = IsotropicGaussian::new(1.0).unwrap();
let mut mh = MetropolisHastings::new(target, proposal, Starts::shared(&[0.0], 2))
    .unwrap()
    .set_seed(42);
let result = mh.run(10);

let file = std::env::temp_dir().join("mcmc_engine_doc_output.csv");
save_csv(&result, &file)?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv<T: Display>(
    result: &MultiChainResult<T>,
    filename: impl AsRef<Path>,
) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let n_dims = result.runs().first().map_or(0, |r| r.chain.dim());
    write_header(&mut wtr, n_dims)?;
    for run in result.runs() {
        write_chain(&mut wtr, run.index, run.chain.draws().view())?;
    }
    wtr.flush()?;
    Ok(())
}

/// Saves draws shaped `[chain, sample, dim]`, e.g. the output of
/// [`MultiChainResult::discard`].
pub fn save_csv_array<T: Display>(
    data: &Array3<T>,
    filename: impl AsRef<Path>,
) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    write_header(&mut wtr, data.shape()[2])?;
    for (chain_idx, chain) in data.axis_iter(Axis(0)).enumerate() {
        write_chain(&mut wtr, chain_idx, chain)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChainRunner;
    use crate::distributions::{LogDensity, Proposal};
    use crate::metropolis_hastings::MetropolisHastings;
    use ndarray::arr3;
    use rand::Rng;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_csv_array_empty_data() {
        let data = arr3::<f32, 0, 0>(&[]);
        let file = NamedTempFile::new().expect("Could not create temp file");

        let result = save_csv_array(&data, file.path());
        assert!(result.is_ok(), "Saving empty data to CSV failed: {:?}", result);

        let contents = fs::read_to_string(file.path()).unwrap();
        assert_eq!(contents.trim(), "chain,sample");
    }

    #[test]
    fn test_save_csv_array_multi_chain() {
        // data[chain][sample][dim]
        let data = arr3(&[[[1, 2], [3, 4]], [[10, 20], [30, 40]]]);
        let file = NamedTempFile::new().expect("Could not create temp file");

        save_csv_array(&data, file.path()).unwrap();

        let contents = fs::read_to_string(file.path()).unwrap();
        let expected = "\
chain,sample,dim_0,dim_1
0,0,1,2
0,1,3,4
1,0,10,20
1,1,30,40";
        assert_eq!(contents.trim(), expected);
    }

    /// Moves one unit up every step.
    #[derive(Clone, Copy)]
    struct StepUp;

    impl Proposal<f64> for StepUp {
        fn sample<R: Rng>(&self, current: &[f64], _rng: &mut R) -> Vec<f64> {
            current.iter().map(|x| x + 1.0).collect()
        }

        fn logp(&self, _from: &[f64], _to: &[f64]) -> f64 {
            0.0
        }

        fn is_symmetric(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_save_csv_keeps_failed_prefix() {
        let target = LogDensity(|x: &[f64]| if x[0] < 3.0 { 0.0 } else { f64::NAN });
        let mut mh =
            MetropolisHastings::new(target, StepUp, vec![vec![0.0], vec![-100.0]]).unwrap();
        let result = mh.run(5);
        assert!(!result[0].is_complete());

        let file = NamedTempFile::new().expect("Could not create temp file");
        save_csv(&result, file.path()).unwrap();

        let contents = fs::read_to_string(file.path()).unwrap();
        let expected = "\
chain,sample,dim_0
0,0,0
0,1,1
0,2,2
1,0,-100
1,1,-99
1,2,-98
1,3,-97
1,4,-96
1,5,-95";
        assert_eq!(contents.trim(), expected);
    }
}
