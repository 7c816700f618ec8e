use clap::{Parser, Subcommand};

/// Modular portrait generation sweeps against the Gemini image API.
#[derive(Parser)]
#[command(name = "img-cli")]
#[command(about = "Compose outfit, style and appearance references into portrait variants")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply an outfit and optional components to test subjects
    #[command(name = "sweep")]
    Sweep {
        /// Outfit reference: image file, directory, or text description
        outfit: Option<String>,

        /// Photo style reference image or directory (image only)
        #[arg(short = 's', long)]
        style: Option<String>,

        /// Hair style reference image, directory, or text
        #[arg(long = "hair-style")]
        hair_style: Option<String>,

        /// Hair color reference image, directory, or text
        #[arg(long = "hair-color")]
        hair_color: Option<String>,

        /// Makeup reference image, directory, or text
        #[arg(long)]
        makeup: Option<String>,

        /// Expression reference image, directory, or text
        #[arg(long)]
        expression: Option<String>,

        /// Accessories reference image, directory, or text
        #[arg(short = 'a', long)]
        accessories: Option<String>,

        /// Complete base outfit worn under the main outfit's outer layer
        #[arg(long = "over-outfit")]
        over_outfit: Option<String>,

        /// Space-separated subject names from subjects/ (omit for all)
        #[arg(short = 't', long)]
        test: Option<String>,

        /// Number of variations per combination
        #[arg(short = 'v', long, default_value = "1")]
        variations: usize,

        /// Include reference images in generation requests
        #[arg(long = "send-original")]
        send_original: bool,

        /// Skip cost confirmation prompts
        #[arg(long = "no-confirm")]
        no_confirm: bool,

        /// Print composed directives and enable debug logging
        #[arg(long)]
        debug: bool,
    },

    /// Analyze one reference image and print the structured JSON
    #[command(name = "analyze")]
    Analyze {
        /// Component kind: outfit, style, hair-style, hair-color, makeup,
        /// expression, accessories
        kind: String,

        /// Image to analyze
        image: String,

        /// Bypass the analysis cache
        #[arg(long = "no-cache")]
        no_cache: bool,
    },

    /// Inspect or clear the per-kind analysis caches
    #[command(name = "cache")]
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show entry counts, sizes and timestamps per cache
    Stats,

    /// Remove cached analyses
    Clear {
        /// Restrict to one component kind
        #[arg(long)]
        kind: Option<String>,
    },
}
