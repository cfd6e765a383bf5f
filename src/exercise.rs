use include_dir::{include_dir, Dir};
use serde::Deserialize;
use serde_json::from_str;
use thiserror::Error;

static EXERCISE_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/exercises");

#[derive(Debug, Error)]
pub enum ExerciseError {
    #[error("exercise file {0} is not valid UTF-8")]
    NotUtf8(String),
    #[error("unable to deserialize exercise {file}: {source}")]
    Json {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no exercises available")]
    Empty,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Exercise {
    pub id: String,
    pub title: String,
    pub language: String,
    pub prompt: String,
    pub expected_output: String,
    #[serde(default)]
    pub starter_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Verdict {
    Pass,
    Fail,
}

/// Source of exercises and judge of submissions
pub trait ExerciseAuthority {
    fn exercises(&self) -> &[Exercise];

    fn exercise(&self, id: &str) -> Option<&Exercise> {
        self.exercises().iter().find(|e| e.id == id)
    }

    /// Exact match against the expected output, ignoring surrounding whitespace
    fn judge(&self, exercise: &Exercise, submission: &str) -> Verdict {
        if submission.trim() == exercise.expected_output.trim() {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

/// Exercise catalogue, sorted by id
#[derive(Debug, Clone)]
pub struct ExerciseBank {
    exercises: Vec<Exercise>,
}

impl ExerciseBank {
    /// Exercises compiled into the binary
    pub fn bundled() -> Result<Self, ExerciseError> {
        let mut exercises = Vec::new();
        for file in EXERCISE_DIR.files() {
            let name = file.path().display().to_string();
            if !name.ends_with(".json") {
                continue;
            }
            let text = file
                .contents_utf8()
                .ok_or_else(|| ExerciseError::NotUtf8(name.clone()))?;
            let exercise = from_str::<Exercise>(text)
                .map_err(|source| ExerciseError::Json { file: name, source })?;
            exercises.push(exercise);
        }
        Self::from_exercises(exercises)
    }

    /// Build a bank from a JSON array of exercises
    pub fn from_json(json: &str) -> Result<Self, ExerciseError> {
        let exercises = from_str::<Vec<Exercise>>(json).map_err(|source| ExerciseError::Json {
            file: "<inline>".to_string(),
            source,
        })?;
        Self::from_exercises(exercises)
    }

    pub fn from_exercises(mut exercises: Vec<Exercise>) -> Result<Self, ExerciseError> {
        if exercises.is_empty() {
            return Err(ExerciseError::Empty);
        }
        exercises.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Self { exercises })
    }

    pub fn first(&self) -> &Exercise {
        &self.exercises[0]
    }
}

impl ExerciseAuthority for ExerciseBank {
    fn exercises(&self) -> &[Exercise] {
        &self.exercises
    }
}
