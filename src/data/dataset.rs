use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// Ophthalmic benchmark whose directory layout encodes the labels. The
/// position of a folder name in the task's list is the class label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Papila,
    GlaucomaFundus,
    Retina,
    Octid,
    Jsiec,
    Idrid,
    /// Five-grade diabetic retinopathy, the fallback layout.
    DrGrading,
}

const JSIEC_FOLDERS: [&str; 39] = [
    "0.0.Normal",
    "20.Massive hard exudates",
    "0.1.Tessellated fundus",
    "21.Yellow-white spots-flecks",
    "0.2.Large optic cup",
    "22.Cotton-wool spots",
    "0.3.DR1",
    "23.Vessel tortuosity",
    "1.0.DR2",
    "24.Chorioretinal atrophy-coloboma",
    "1.1.DR3",
    "25.Preretinal hemorrhage",
    "10.0.Possible glaucoma",
    "26.Fibrosis",
    "10.1.Optic atrophy",
    "27.Laser Spots",
    "11.Severe hypertensive retinopathy",
    "28.Silicon oil in eye",
    "12.Disc swelling and elevation",
    "29.0.Blur fundus without PDR",
    "13.Dragged Disc",
    "29.1.Blur fundus with suspected PDR",
    "14.Congenital disc abnormality",
    "3.RAO",
    "15.0.Retinitis pigmentosa",
    "4.Rhegmatogenous RD",
    "15.1.Bietti crystalline dystrophy",
    "5.0.CSCR",
    "16.Peripheral retinal degeneration and break",
    "5.1.VKH disease",
    "17.Myelinated nerve fiber",
    "6.Maculopathy",
    "18.Vitreous particles",
    "7.ERM",
    "19.Fundus neoplasm",
    "8.MH",
    "2.0.BRVO",
    "9.Pathological myopia",
    "2.1.CRVO",
];

impl Task {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name.to_ascii_lowercase().as_str() {
            "papila" => Ok(Self::Papila),
            "glaucoma_fundus" => Ok(Self::GlaucomaFundus),
            "retina" => Ok(Self::Retina),
            "octid" => Ok(Self::Octid),
            "jsiec" => Ok(Self::Jsiec),
            "idrid" => Ok(Self::Idrid),
            "dr_grading" => Ok(Self::DrGrading),
            _ => Err(format!(
                "unknown task `{name}`, expected one of PAPILA, Glaucoma_fundus, \
                 Retina, OCTID, JSIEC, IDRiD, DR_grading"
            )),
        }
    }

    /// Infers the task from the dataset path, falling back to the
    /// diabetic-retinopathy layout.
    pub fn detect(root: &Path) -> Self {
        let path = root.to_string_lossy();

        if path.contains("PAPILA") {
            Self::Papila
        } else if path.contains("Glaucoma_fundus") {
            Self::GlaucomaFundus
        } else if path.contains("Retina") {
            Self::Retina
        } else if path.contains("OCTID") {
            Self::Octid
        } else if path.contains("JSIEC") {
            Self::Jsiec
        } else if path.contains("IDRiD") {
            Self::Idrid
        } else {
            Self::DrGrading
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Papila => "PAPILA",
            Self::GlaucomaFundus => "Glaucoma_fundus",
            Self::Retina => "Retina",
            Self::Octid => "OCTID",
            Self::Jsiec => "JSIEC",
            Self::Idrid => "IDRiD",
            Self::DrGrading => "DR_grading",
        }
    }

    /// Class folder names in label order.
    pub fn class_folders(&self) -> &'static [&'static str] {
        match self {
            Self::Papila => &["anormal", "bsuspectglaucoma", "cglaucoma"],
            Self::GlaucomaFundus => {
                &["anormal_control", "bearly_glaucoma", "cadvanced_glaucoma"]
            }
            Self::Retina => &["anormal", "bcataract", "cglaucoma", "ddretina_disease"],
            Self::Octid => &[
                "ANormal",
                "ARMD",
                "CSR",
                "Diabetic_retinopathy",
                "Macular_Hole",
            ],
            Self::Jsiec => &JSIEC_FOLDERS,
            Self::Idrid => &["anoDR", "bmildDR", "cmoderateDR", "dsevereDR", "eproDR"],
            Self::DrGrading => &[
                "anodr",
                "bmilddr",
                "cmoderatedr",
                "dseveredr",
                "eproliferativedr",
            ],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_folders().len()
    }
}

impl std::str::FromStr for Task {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name)
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum DatasetError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    MissingClassDir {
        path: PathBuf,
    },
    EmptySplit {
        path: PathBuf,
    },
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            Self::MissingClassDir { path } => {
                write!(f, "class directory {} does not exist", path.display())
            }
            Self::EmptySplit { path } => {
                write!(f, "no images found under {}", path.display())
            }
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// One decoded test image: RGB pixels in `[0, 1]`, row-major HWC at
/// `image_size` per side.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub label: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    label: usize,
}

/// Test-split dataset over a `root/<split>/<class_folder>/` tree. Images
/// are decoded lazily; file names are sorted per folder so iteration
/// order does not depend on the filesystem.
pub struct ClassFolderDataset {
    entries: Vec<Entry>,
    image_size: usize,
}

impl ClassFolderDataset {
    pub fn new(
        root: impl Into<PathBuf>,
        split: &str,
        task: Task,
        image_size: usize,
    ) -> Result<Self, DatasetError> {
        let root = root.into();
        let mut entries = Vec::new();

        for (label, folder) in task.class_folders().iter().enumerate() {
            let dir = root.join(split).join(folder);
            if !dir.is_dir() {
                return Err(DatasetError::MissingClassDir { path: dir });
            }

            let mut files = Vec::new();
            let listing = std::fs::read_dir(&dir).map_err(|source| DatasetError::Io {
                path: dir.clone(),
                source,
            })?;
            for item in listing {
                let item = item.map_err(|source| DatasetError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let path = item.path();
                if path.is_file() {
                    files.push(path);
                }
            }
            files.sort();

            entries.extend(files.into_iter().map(|path| Entry { path, label }));
        }

        if entries.is_empty() {
            return Err(DatasetError::EmptySplit {
                path: root.join(split),
            });
        }

        log::info!(
            "loaded {} test images across {} classes from {}",
            entries.len(),
            task.num_classes(),
            root.display(),
        );

        Ok(Self {
            entries,
            image_size,
        })
    }

    /// Image paths in enumeration order, without decoding anything.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|entry| entry.path.clone()).collect()
    }
}

impl Dataset<ImageItem> for ClassFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let entry = self.entries.get(index)?;

        let image = image::open(&entry.path).unwrap_or_else(|err| {
            panic!("failed to decode image {}: {err}", entry.path.display())
        });
        let size = self.image_size as u32;
        let image = image.resize_exact(size, size, image::imageops::FilterType::CatmullRom);

        Some(ImageItem {
            pixels: image.to_rgb32f().into_raw(),
            label: entry.label,
            path: entry.path.clone(),
        })
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
