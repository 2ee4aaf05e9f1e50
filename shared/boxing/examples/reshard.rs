use anyhow::Result;
use clap::Parser;
use weft_boxing::{BoxingConfig, BoxingEngine};
use weft_core::{DeviceKind, Distribution, Grid, LocalBuffer, Placement, Sbp};
use weft_transport::run_ranks;

/// Drives a tensor through a few redistributions on an in-process
/// four-rank cluster and prints every rank's shard along the way.
#[derive(Parser)]
struct Args {
    /// Global tensor rows.
    #[arg(long, default_value_t = 4)]
    rows: usize,

    /// Global tensor columns.
    #[arg(long, default_value_t = 6)]
    cols: usize,

    /// Refuse accelerator placements.
    #[arg(long, env = "WEFT_CPU_ONLY")]
    cpu_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let world = [0, 1, 2, 3];
    let rows = args.rows;
    let cols = args.cols;

    let flat = Placement::host(world.to_vec())?;
    let square = Placement::new(
        DeviceKind::Host,
        Grid::with_hierarchy(world.to_vec(), vec![2, 2])?,
    );
    let config = BoxingConfig {
        cpu_only: args.cpu_only,
        ..Default::default()
    };

    let results = run_ranks(&world, move |rank| -> Result<Vec<String>> {
        let engine = BoxingEngine::with_config(rank, config.clone());
        let values: Vec<f32> = (0..rows * cols).map(|i| i as f32).collect();
        let full = LocalBuffer::from_slice(&values, &[rows, cols], DeviceKind::Host)?;

        let mut log = Vec::new();
        let replicated = engine.lift(full, flat.clone(), Sbp::Broadcast.into())?;
        let row_shards = engine.box_to(&replicated, flat.clone(), Sbp::Split(0).into())?;
        log.push(format!(
            "rank {rank} S(0) shard: {:?}",
            row_shards.to_local()?.shape()
        ));

        let col_shards = engine.box_to(&row_shards, flat.clone(), Sbp::Split(1).into())?;
        log.push(format!(
            "rank {rank} S(1) shard: {:?}",
            col_shards.to_local()?.shape()
        ));

        let tiled = engine.box_to(
            &col_shards,
            square.clone(),
            Distribution::new(vec![Sbp::Split(0), Sbp::Split(1)]),
        )?;
        log.push(format!(
            "rank {rank} [S(0), S(1)] tile: {:?}",
            tiled.to_local()?.shape()
        ));

        let back = engine.box_to(&tiled, flat.clone(), Sbp::Broadcast.into())?;
        log.push(format!(
            "rank {rank} restored: {:?}",
            back.to_local()?.shape()
        ));
        Ok(log)
    });

    for lines in results {
        for line in lines? {
            println!("{line}");
        }
    }
    Ok(())
}
