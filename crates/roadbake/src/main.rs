use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    time::Instant,
};
use walkdir::WalkDir;

use hmap::{GeoExtentQ7, HmapTile, MaskChunk};
use roadnet::{
    GeoBounds, Georef, Heightmap, HintError, JunctionHint, JunctionHintSource, JunctionKind, PipelineConfig,
    PipelineReport, RoadNetwork, RoadSource, TerrainPipeline,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "roadbake", version)]
struct Args {
    /// Input heightmap tile (.hmap); a GEOT chunk enables geographic sources and hints.
    #[arg(long)]
    heightmap: PathBuf,

    /// Directory walked for road source files (*.json).
    #[arg(long, default_value = "roads")]
    sources_dir: PathBuf,

    /// Optional JSON array of junction hints (`{"lon", "lat", "degree"}`).
    #[arg(long)]
    hints: Option<PathBuf>,

    /// Optional JSON pipeline configuration; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "baked")]
    output_dir: PathBuf,

    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

/// A source file holds either one material or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceFile {
    One(RoadSource),
    Many(Vec<RoadSource>),
}

impl SourceFile {
    fn into_vec(self) -> Vec<RoadSource> {
        match self {
            SourceFile::One(s) => vec![s],
            SourceFile::Many(v) => v,
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

fn find_source_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .collect();

    // Source order breaks priority ties, so it must not depend on the walk.
    files.sort();
    files
}

fn parse_source_file(path: &Path) -> Result<Vec<RoadSource>> {
    let reader = BufReader::new(File::open(path)?);
    let parsed: SourceFile =
        serde_json::from_reader(reader).with_context(|| format!("parsing {}", path.display()))?;
    Ok(parsed.into_vec())
}

/// Parses every file in parallel; unreadable files are skipped with a warning.
fn load_sources(files: &[PathBuf]) -> Vec<RoadSource> {
    let parsed: Vec<Option<Vec<RoadSource>>> = files
        .par_iter()
        .map(|path| match parse_source_file(path) {
            Ok(sources) => {
                debug!("{}: {} material(s)", path.display(), sources.len());
                Some(sources)
            }
            Err(err) => {
                warn!("Skipping {}: {:#}", path.display(), err);
                None
            }
        })
        .collect();

    parsed.into_iter().flatten().flatten().collect()
}

fn load_heightmap(path: &Path) -> Result<(Heightmap, Option<GeoExtentQ7>)> {
    let tile = hmap::read_file(path).with_context(|| format!("reading heightmap {}", path.display()))?;

    let mut heightmap = Heightmap::from_data(
        tile.width as usize,
        tile.height as usize,
        tile.cell_size,
        tile.samples,
    )
    .with_context(|| format!("{}: empty {}x{} grid", path.display(), tile.width, tile.height))?;

    if let Some(geot) = tile.geot {
        let (lon_min, lon_max, lat_min, lat_max) = geot.to_deg();
        let bounds = GeoBounds {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        };
        let extent = heightmap.extent_m();
        heightmap = heightmap.with_georef(Georef::new(bounds, extent));
    }

    Ok((heightmap, tile.geot))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let reader = BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?);
            serde_json::from_reader(reader).with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(PipelineConfig::default()),
    }
}

/// Junction hints read from a JSON file each time they are fetched.
struct JsonHintFile {
    path: PathBuf,
}

impl JunctionHintSource for JsonHintFile {
    fn fetch(&self, bounds: &GeoBounds) -> Result<Vec<JunctionHint>, HintError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let hints: Vec<JunctionHint> =
            serde_json::from_reader(reader).map_err(|e| HintError::Malformed(e.to_string()))?;

        Ok(hints
            .into_iter()
            .filter(|h| bounds.contains(h.lon, h.lat))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SplineSummary {
    id: u32,
    material: String,
    priority: i32,
    roundabout: bool,
    bridge: bool,
    tunnel: bool,
    length_m: f32,
    cross_sections: usize,
    uncalculated: usize,
    min_elevation_m: Option<f32>,
    max_elevation_m: Option<f32>,
    max_bank_deg: f32,
}

#[derive(Debug, Serialize)]
struct JunctionSummary {
    id: u32,
    kind: JunctionKind,
    position: [f32; 2],
    splines: Vec<u32>,
    cross_material: bool,
    excluded: bool,
    exclusion_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct BakeReport<'a> {
    heightmap: String,
    source_files: usize,
    materials: Vec<String>,
    elapsed_s: f64,
    pipeline: &'a PipelineReport,
    splines: Vec<SplineSummary>,
    junctions: Vec<JunctionSummary>,
}

fn summarize_splines(network: &RoadNetwork) -> Vec<SplineSummary> {
    network
        .splines()
        .iter()
        .map(|road| {
            let sections = network.sections_of(road.id);
            let elevations: Vec<f32> = network.elevations_of(road.id).into_iter().flatten().collect();
            let max_bank = sections
                .iter()
                .map(|&c| network.cross_section(c).bank_angle.abs())
                .fold(0.0f32, f32::max);

            SplineSummary {
                id: road.id.0,
                material: road.material.clone(),
                priority: road.priority,
                roundabout: road.is_roundabout,
                bridge: road.is_bridge,
                tunnel: road.is_tunnel,
                length_m: road.spline.length(),
                cross_sections: sections.len(),
                uncalculated: sections.len() - elevations.len(),
                min_elevation_m: elevations.iter().copied().reduce(f32::min),
                max_elevation_m: elevations.iter().copied().reduce(f32::max),
                max_bank_deg: max_bank.to_degrees(),
            }
        })
        .collect()
}

fn summarize_junctions(network: &RoadNetwork) -> Vec<JunctionSummary> {
    network
        .junctions()
        .iter()
        .map(|j| {
            let mut splines: Vec<u32> = j.participants.iter().map(|p| p.spline.0).collect();
            splines.sort_unstable();
            splines.dedup();

            JunctionSummary {
                id: j.id.0,
                kind: j.kind,
                position: [j.position.x, j.position.y],
                splines,
                cross_material: j.cross_material,
                excluded: j.excluded,
                exclusion_reason: j.exclusion_reason.clone(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

fn to_tile(heightmap: &Heightmap, geot: Option<GeoExtentQ7>) -> HmapTile {
    let mut tile = HmapTile::new(
        heightmap.width as u32,
        heightmap.height as u32,
        heightmap.cell_size,
        heightmap.data.clone(),
    );
    tile.geot = geot;
    tile
}

fn main() -> Result<()> {
    env_logger::init();
    let started = Instant::now();

    // Parse arguments and prepare output directory.
    let args = Args::parse();
    fs::create_dir_all(&args.output_dir)?;

    let stem = args
        .heightmap
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tile".to_owned());

    let baked_path = args.output_dir.join(format!("{stem}_baked.hmap"));
    let delta_path = args.output_dir.join(format!("{stem}_delta.hmap"));
    let report_path = args.output_dir.join(format!("{stem}_report.json"));

    if baked_path.exists() && !args.overwrite {
        info!("{} exists, skipping (pass --overwrite to replace)", baked_path.display());
        return Ok(());
    }

    // ---------------------------------------------------------------------
    // Load inputs
    // ---------------------------------------------------------------------
    let (heightmap, geot) = load_heightmap(&args.heightmap)?;
    info!(
        "Heightmap {}: {}x{} cells @ {} m{}",
        args.heightmap.display(),
        heightmap.width,
        heightmap.height,
        heightmap.cell_size,
        if geot.is_some() { ", georeferenced" } else { "" }
    );

    let config = load_config(args.config.as_deref())?;

    let files = find_source_files(&args.sources_dir);
    info!("Parsing {} source files...", files.len());
    let sources = load_sources(&files);
    let materials: Vec<String> = sources.iter().map(|s| s.material.clone()).collect();
    info!("{} road sources loaded", sources.len());

    // ---------------------------------------------------------------------
    // Run the pipeline
    // ---------------------------------------------------------------------
    let mut pipeline = TerrainPipeline::new(config, heightmap, sources).context("validating inputs")?;
    if let Some(path) = &args.hints {
        pipeline = pipeline.with_hints(Box::new(JsonHintFile { path: path.clone() }));
    }
    pipeline.run_to_completion().context("running pipeline")?;

    let (network, blended, masks, report) = pipeline.into_parts();
    let blended = blended.context("pipeline finished without a blended heightmap")?;

    // ---------------------------------------------------------------------
    // Write outputs
    // ---------------------------------------------------------------------
    let mut baked = to_tile(&blended.heightmap, geot);
    baked.masks = masks
        .iter()
        .map(|m| MaskChunk::from_raw(m.material.clone(), &m.data))
        .collect();
    hmap::write_file(&baked_path, &baked).with_context(|| format!("writing {}", baked_path.display()))?;

    let delta = to_tile(&blended.delta, geot);
    hmap::write_file(&delta_path, &delta).with_context(|| format!("writing {}", delta_path.display()))?;

    let bake_report = BakeReport {
        heightmap: args.heightmap.display().to_string(),
        source_files: files.len(),
        materials,
        elapsed_s: started.elapsed().as_secs_f64(),
        pipeline: &report,
        splines: summarize_splines(&network),
        junctions: summarize_junctions(&network),
    };
    let json = serde_json::to_string_pretty(&bake_report)?;
    fs::write(&report_path, json).with_context(|| format!("writing {}", report_path.display()))?;

    info!(
        "OK {} -> {} ({} cells modified, cut {:.1} m³, fill {:.1} m³, {} masks)",
        args.heightmap.display(),
        baked_path.display(),
        report.blend.pixels_modified,
        report.blend.cut_volume_m3,
        report.blend.fill_volume_m3,
        baked.masks.len()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("roadbake-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn source_files_hold_one_or_many_materials() {
        let dir = scratch("sources");
        fs::write(
            dir.join("a.json"),
            r#"{ "material": "asphalt", "paths": [{ "space": "local", "points": [[0, 0], [10, 0]] }] }"#,
        )
        .unwrap();
        fs::write(
            dir.join("b.json"),
            r#"[{ "material": "gravel", "paths": [] }, { "material": "dirt", "paths": [] }]"#,
        )
        .unwrap();
        fs::write(dir.join("broken.json"), "{ not json").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let files = find_source_files(&dir);
        assert_eq!(files.len(), 3);

        let sources = load_sources(&files);
        let names: Vec<&str> = sources.iter().map(|s| s.material.as_str()).collect();
        assert_eq!(names, ["asphalt", "gravel", "dirt"]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn hint_file_is_clipped_and_malformed_is_an_error() {
        let dir = scratch("hints");
        let path = dir.join("hints.json");
        fs::write(
            &path,
            r#"[{ "lon": 8.001, "lat": 47.001, "degree": 3 }, { "lon": 9.5, "lat": 47.001 }]"#,
        )
        .unwrap();

        let bounds = GeoBounds {
            lon_min: 8.0,
            lat_min: 47.0,
            lon_max: 8.01,
            lat_max: 47.01,
        };
        let source = JsonHintFile { path: path.clone() };
        let hints = source.fetch(&bounds).unwrap();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].degree, Some(3));

        fs::write(&path, "[{").unwrap();
        assert!(matches!(source.fetch(&bounds), Err(HintError::Malformed(_))));

        let missing = JsonHintFile {
            path: dir.join("absent.json"),
        };
        assert!(matches!(missing.fetch(&bounds), Err(HintError::Io(_))));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn georeferenced_tile_loads_into_heightmap() {
        let dir = scratch("tile");
        let path = dir.join("t.hmap");
        let mut tile = HmapTile::new(3, 2, 5.0, vec![1.0; 6]);
        tile.geot = Some(GeoExtentQ7::from_deg(8.0, 8.01, 47.0, 47.01));
        hmap::write_file(&path, &tile).unwrap();

        let (hm, geot) = load_heightmap(&path).unwrap();
        assert_eq!((hm.width, hm.height, hm.cell_size), (3, 2, 5.0));
        assert_eq!(geot, tile.geot);
        let georef = hm.georef.unwrap();
        assert_eq!((georef.extent_m.x, georef.extent_m.y), (10.0, 5.0));

        let _ = fs::remove_dir_all(&dir);
    }
}
