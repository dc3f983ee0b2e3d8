//! Builds a small arithmetic pipeline, prints the lowered programs, and
//! evaluates it across a few worker counts.

use anyhow::Result;

use fission::{value, ExecConfig, TaskGraph, Value};
use fission_vec::ops;

fn main() -> Result<()> {
    env_logger::init();

    for workers in [1usize, 2, 4] {
        let graph = TaskGraph::with_config(ExecConfig {
            workers,
            batch_size: 4096,
            ..ExecConfig::default()
        });

        let a: Value = value(vec![1.0f64; 1_000_000]);
        let b: Value = value(vec![2.0f64; 1_000_000]);

        let summed = ops::add(&graph, a.clone(), b.clone());
        let scaled = ops::scale(&graph, &summed, 10.0);
        let total = ops::sum(&graph, &scaled);

        if workers == 1 {
            println!("{}", graph.explain()?);
        }

        let total = total.value_as::<f64>()?;
        println!("workers={workers} total={total}");
    }
    Ok(())
}
