use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};

use astromatch::catalog::MemoryCatalog;
use astromatch::geom::SkyCoord;
use astromatch::grid::{Area, StarPosition};
use astromatch::matcher::MatchOutcome;
use astromatch::orchestrator::{Judgement, MatchMode, MatchTuning, StarField, match_fields};
use astromatch::pipeline::{AstrometricSolver, DetectedStar, SolveMode, SolveRequest, Solution};
use astromatch::retry::{RetryCandidates, RetryPolicy};

#[derive(Parser)]
#[command(name = "astromatch", about = "Match detected stars against a catalog or another frame")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Uncertain,
    SemiAccurate,
    Accurate,
}

#[derive(Clone, Copy, ValueEnum)]
enum RetryArg {
    None,
    Uncertain,
    Search,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a detected star list against a reference catalog.
    Solve {
        /// Detected stars, one "x y mag" per line, top-left pixel origin.
        stars: PathBuf,

        /// Text catalog, one "id ra_deg dec_deg mag" per line.
        #[arg(short, long, required_unless_present = "starfield")]
        catalog: Option<PathBuf>,

        /// starfield binary catalog (requires the `starfield` feature).
        #[arg(long)]
        starfield: Option<PathBuf>,

        /// Image width in pixels.
        #[arg(long)]
        width: f64,

        /// Image height in pixels.
        #[arg(long)]
        height: f64,

        /// Guessed RA of the field center (degrees).
        #[arg(long)]
        ra: f64,

        /// Guessed Dec of the field center (degrees).
        #[arg(long, allow_hyphen_values = true)]
        dec: f64,

        /// Field of view along the image width (degrees).
        #[arg(long)]
        fov_width: f64,

        /// Field of view along the image height (degrees).
        #[arg(long)]
        fov_height: f64,

        /// Guessed position angle (degrees).
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        position_angle: f64,

        /// How far the pointing guess is trusted.
        #[arg(long, value_enum, default_value = "uncertain")]
        mode: ModeArg,

        /// Use the loose positional check.
        #[arg(long)]
        loose: bool,

        /// Alternate pointings to try when matching fails.
        #[arg(long, value_enum, default_value = "none")]
        retry: RetryArg,

        /// Radius of the position search grid (degrees).
        #[arg(long, default_value = "1.0")]
        search_radius: f64,

        /// Print every catalog star that lands on the image.
        #[arg(long)]
        list_stars: bool,
    },

    /// Find the transform between two detected star lists.
    Match {
        /// Stars to locate, one "x y mag" per line.
        located: PathBuf,

        /// Stars to search, one "x y mag" per line.
        searched: PathBuf,

        /// Image width in pixels.
        #[arg(long)]
        width: f64,

        /// Image height in pixels.
        #[arg(long)]
        height: f64,

        /// Use the loose positional check.
        #[arg(long)]
        loose: bool,
    },
}

fn read_star_list(path: &Path) -> Vec<DetectedStar> {
    let file = File::open(path).unwrap_or_else(|e| {
        eprintln!("Failed to open star list {}: {e}", path.display());
        process::exit(1);
    });

    let mut stars = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {e}", path.display());
            process::exit(1);
        });
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values: Vec<f64> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .unwrap_or_else(|e| {
                eprintln!("{}:{}: {e}", path.display(), n + 1);
                process::exit(1);
            });
        let [x, y, mag] = values[..] else {
            eprintln!(
                "{}:{}: expected \"x y mag\", got {} values",
                path.display(),
                n + 1,
                values.len()
            );
            process::exit(1);
        };
        stars.push(DetectedStar::new(x, y, mag));
    }
    stars
}

fn load_catalog(text: Option<&Path>, starfield: Option<&Path>) -> MemoryCatalog {
    let result = match (text, starfield) {
        (_, Some(path)) => load_starfield(path),
        (Some(path), None) => MemoryCatalog::load_text(path),
        (None, None) => {
            eprintln!("No catalog given");
            process::exit(1);
        }
    };
    result.unwrap_or_else(|e| {
        eprintln!("Failed to load catalog: {e}");
        process::exit(1);
    })
}

#[cfg(feature = "starfield")]
fn load_starfield(path: &Path) -> Result<MemoryCatalog, astromatch::catalog::CatalogError> {
    MemoryCatalog::from_starfield(path)
}

#[cfg(not(feature = "starfield"))]
fn load_starfield(_path: &Path) -> Result<MemoryCatalog, astromatch::catalog::CatalogError> {
    eprintln!("starfield catalogs not enabled. Build with --features starfield");
    process::exit(1);
}

fn judgement(loose: bool) -> Judgement {
    if loose {
        Judgement::Loose
    } else {
        Judgement::Normal
    }
}

fn print_solution(solution: &Solution, list_stars: bool, size: (f64, f64)) {
    println!("Solved!");
    println!("  Field center: {}", solution.center);
    println!("  Pixel scale: {:.4} arcsec/pixel", solution.pixel_scale);
    println!("  Rotation: {:.3} deg", solution.position_angle);
    match &solution.refinement {
        Some(r) => println!("  Refinement: {} (score {:.3})", r.map, r.score),
        None => println!("  Refinement: none (pointing taken as exact)"),
    }
    println!("  Matched: {}", solution.n_matched);

    if list_stars {
        for placed in solution
            .catalog
            .iter()
            .filter(|p| p.x >= 0.0 && p.x < size.0 && p.y >= 0.0 && p.y < size.1)
        {
            println!(
                "{} {:.3} {:.3} {:.2}",
                placed.star.id, placed.x, placed.y, placed.star.mag
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_solve(
    stars_path: &Path,
    catalog: MemoryCatalog,
    size: (f64, f64),
    center: SkyCoord,
    fov: (f64, f64),
    position_angle: f64,
    mode: SolveMode,
    judgement: Judgement,
    policy: RetryPolicy,
    list_stars: bool,
) {
    let stars = read_star_list(stars_path);
    eprintln!(
        "Loaded {} detected stars and {} catalog stars",
        stars.len(),
        catalog.len()
    );

    let request = SolveRequest {
        image_size: size,
        stars: &stars,
        center,
        fov,
        position_angle,
        mode,
        judgement,
    };
    let mut retries = RetryCandidates::new(center, fov, policy).unwrap_or_else(|e| {
        eprintln!("Invalid retry policy: {e}");
        process::exit(1);
    });
    let mut solver = AstrometricSolver::new(catalog);

    let t0 = Instant::now();
    let result = solver.solve_with_retries(&request, &mut retries);
    eprintln!(
        "Finished in {:.2}s after {} of {} pointing(s)",
        t0.elapsed().as_secs_f64(),
        retries.position().min(retries.len() - 1) + 1,
        retries.len()
    );

    match result {
        Ok(solution) => print_solution(&solution, list_stars, size),
        Err(e) => {
            eprintln!("No solution: {e}");
            process::exit(1);
        }
    }
}

fn cmd_match(located_path: &Path, searched_path: &Path, size: (f64, f64), judgement: Judgement) {
    let centered = |stars: Vec<DetectedStar>| -> Vec<StarPosition> {
        stars
            .iter()
            .enumerate()
            .map(|(i, s)| StarPosition::new(i, s.x - size.0 / 2.0, s.y - size.1 / 2.0, s.mag))
            .collect()
    };
    let located = centered(read_star_list(located_path));
    let searched = centered(read_star_list(searched_path));
    eprintln!("Loaded {} + {} stars", located.len(), searched.len());

    let area = Area::centered(size.0, size.1);
    let outcome = match_fields(
        StarField::new(&located, area),
        StarField::accepting_out_of_bounds(&searched, area),
        MatchMode::ImageToImage,
        judgement,
        &MatchTuning::default(),
    )
    .unwrap_or_else(|e| {
        eprintln!("Match failed: {e}");
        process::exit(1);
    });

    let verdict = match outcome {
        MatchOutcome::Accepted(_) => "accepted",
        MatchOutcome::Weak(_) => "weak",
        MatchOutcome::Rejected(_) => "rejected",
    };
    let rejected = outcome.is_rejected();
    let result = outcome.into_result();
    println!("Match {verdict}: score {:.3}, {} stars", result.score, result.n_matched);
    println!("  Transform (centred pixels): {}", result.map);
    if rejected {
        process::exit(1);
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Solve {
            stars,
            catalog,
            starfield,
            width,
            height,
            ra,
            dec,
            fov_width,
            fov_height,
            position_angle,
            mode,
            loose,
            retry,
            search_radius,
            list_stars,
        } => {
            let catalog = load_catalog(catalog.as_deref(), starfield.as_deref());
            let mode = match mode {
                ModeArg::Uncertain => SolveMode::Uncertain,
                ModeArg::SemiAccurate => SolveMode::SemiAccurate,
                ModeArg::Accurate => SolveMode::Accurate,
            };
            let policy = match retry {
                RetryArg::None => RetryPolicy::NoRetry,
                RetryArg::Uncertain => RetryPolicy::PositionUncertain,
                RetryArg::Search => RetryPolicy::PositionSearch {
                    radius: *search_radius,
                },
            };
            cmd_solve(
                stars,
                catalog,
                (*width, *height),
                SkyCoord::from_degrees(*ra, *dec),
                (*fov_width, *fov_height),
                *position_angle,
                mode,
                judgement(*loose),
                policy,
                *list_stars,
            );
        }
        Commands::Match {
            located,
            searched,
            width,
            height,
            loose,
        } => {
            cmd_match(located, searched, (*width, *height), judgement(*loose));
        }
    }
}
