use std::{
    fs::create_dir_all,
    io,
    path::{Path, PathBuf},
};

use tabmove::{TableStore, CSV_GZ};

use crate::{
    error::{Error, Result},
    records::EntityKind,
};

pub const ARTICLES: &str = "articles";
pub const VENUES: &str = "venues";

pub const TRAJ_RAW: &str = "trajectory_raw";
pub const TRAJ_LIGHT: &str = "trajectory_light";
pub const TRAJ_HEAVY: &str = "trajectory_heavy";
pub const COORDS_GLOBAL: &str = "trajectory_coords_global";
pub const COORDS_LOCAL: &str = "trajectory_coords_local";
pub const RUN_REPORT: &str = "run_report";

macro_rules! pathfields_fn {
    ($($k:ident => $v:literal),*,) => {

        pub fn new(root_path: &Path) -> io::Result<Self> {
            $(
                let $k = root_path.join($v);
                create_dir_all(&$k)?;
            )*

            Ok(Self {
                root: root_path.to_path_buf(),
                $(
                    $k,
                )*
            })
        }
    };
}

pub struct Stowage {
    pub root: PathBuf,
    pub inputs: PathBuf,
    pub snapshots: PathBuf,
    pub cache: PathBuf,
}

impl Stowage {
    pathfields_fn!(
        inputs => "inputs",
        snapshots => "snapshots",
        cache => "cache",
    );

    pub fn articles_path(&self) -> PathBuf {
        self.inputs.join(ARTICLES).with_extension(CSV_GZ)
    }

    pub fn venues_path(&self) -> PathBuf {
        self.inputs.join(VENUES).with_extension(CSV_GZ)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshots.join(ARTICLES).with_extension("bin")
    }

    pub fn snapshot_meta_path(&self) -> PathBuf {
        self.snapshots.join(ARTICLES).with_extension("json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.cache.join(RUN_REPORT).with_extension("json.gz")
    }

    pub fn store(&self) -> TableStore {
        TableStore::new(&self.cache)
    }

    pub fn require_inputs(&self) -> Result<()> {
        for p in [self.articles_path(), self.venues_path()] {
            if !p.is_file() {
                return Err(Error::InputMissing(p));
            }
        }
        Ok(())
    }
}

pub fn annual_table(kind: EntityKind) -> String {
    format!("metrics_{}_annual", kind)
}

pub fn period_table(kind: EntityKind, period: &str) -> String {
    format!("metrics_{}_period_{}", kind, period)
}

pub fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}
