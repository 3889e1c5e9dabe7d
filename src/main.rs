use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use rmm::graph::Network;
use rmm::mm::{Config, MMResult, MMatch, MultiTrajectory};
use rmm::utils;
use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "RMM")]
#[command(author = "pengxin.wu <wupeaking@gmail.com>")]
#[command(version = "0.2")]
#[command(about = "fast map matching using rust", long_about = None)]
struct Args {
    /// max distance of precomputed shortest path in meters
    #[arg(long, default_value_t = 1000.0)]
    max_distance: f64,
    /// find candidate points in radius, also the unit of densification
    #[arg(long, default_value_t = 50.0)]
    search_range: f64,
    /// radius growth when no candidate found
    #[arg(long, default_value_t = 10.0)]
    radius_step: f64,
    /// upper bound of search radius, unbounded if not set
    #[arg(long)]
    max_search_range: Option<f64>,
    /// standard deviation of gps error in meters
    #[arg(long, default_value_t = 50.0)]
    sigma: f64,
    /// renormalize a layer when its best probability falls below
    #[arg(long, default_value_t = 1e-150)]
    renormalize_floor: f64,
    /// worker threads, 0 means number of cpus
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
    /// road network path
    #[arg(short, long, value_name = "ROAD_NETWORK_FILE")]
    network_file: String,
    /// output geojson path, print to stdout if not set
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    output: Option<PathBuf>,

    /// input  gps traj input
    #[arg(value_name = "GPS_TRAJ_FILE")]
    input_file: PathBuf,
}

fn read_trajs(path: &Path) -> Result<MultiTrajectory> {
    // 检查文件后缀
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| anyhow!("gps file without extension: {}", path.display()))?;
    match ext {
        "geojson" | "json" => {
            info!("read geojson file {} ", path.display());
            let reader = BufReader::new(File::open(path)?);
            let geojson = geojson::GeoJson::from_reader(reader)?;
            MultiTrajectory::try_from(geojson).context("read gps traj failed")
        }
        "wkt" => {
            info!("read wkt file {} ", path.display());
            let content = fs::read_to_string(path)?;
            let wkt: wkt::Wkt<f64> = content
                .trim()
                .parse()
                .map_err(|e| anyhow!("parse wkt failed: {}", e))?;
            MultiTrajectory::try_from(wkt).context("read gps traj failed")
        }
        _ => Err(anyhow!("gps file format not support: {}", ext)),
    }
}

// 匹配结果输出为 LineString, 属性中带上长度与经过的 edge
fn to_feature(network: &Network, index: usize, result: &MMResult) -> geojson::Feature {
    let line: Vec<Vec<f64>> = result
        .route
        .iter()
        .map(|id| {
            let coord = network.point(*id).coord();
            vec![coord.lon, coord.lat]
        })
        .collect();
    let mut properties = geojson::JsonObject::new();
    properties.insert("index".to_string(), index.into());
    properties.insert("length".to_string(), result.length.into());
    properties.insert(
        "edges".to_string(),
        result.edges.iter().map(|e| e.0).collect::<Vec<_>>().into(),
    );
    properties.insert(
        "points".to_string(),
        result
            .points
            .iter()
            .map(|id| {
                let coord = network.point(*id).coord();
                vec![coord.lon, coord.lat]
            })
            .collect::<Vec<_>>()
            .into(),
    );
    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::LineString(line))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn main() -> Result<()> {
    utils::log::log_init();
    let args = Args::parse();
    debug!("{:?}", args);

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()?;
    }

    // 配置
    let config = Config {
        max_distance: args.max_distance,
        search_range: args.search_range,
        radius_step: args.radius_step,
        max_search_range: args.max_search_range,
        sigma: args.sigma,
        renormalize_floor: args.renormalize_floor,
    };

    info!("try construct map matching network from geojson file");
    let map_match = MMatch::from_file(&args.network_file, config)
        .with_context(|| format!("construct map matching network failed: {}", args.network_file))?;

    let gps_trajs = read_trajs(&args.input_file)?;
    info!("matching {} gps trajectories", gps_trajs.trajs.len());

    let results = map_match.match_all(&gps_trajs.trajs);
    let mut features = Vec::with_capacity(results.len());
    for (index, result) in results.iter().enumerate() {
        match result {
            Ok(mm_result) => {
                info!(
                    "{}th traj matched, length: {:.2}, edges: {:?}",
                    index + 1,
                    mm_result.length,
                    mm_result.edges
                );
                features.push(to_feature(map_match.network(), index, mm_result));
            }
            Err(e) => warn!("{}th traj match failed: {}", index + 1, e),
        }
    }

    let collection = geojson::GeoJson::from(geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    });
    let text = collection.to_string();
    match args.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(&path)?);
            writer.write_all(text.as_bytes())?;
            writer.flush()?;
            info!("write match result to {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}
