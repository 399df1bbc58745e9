//! Networks served by an external runner program.
//!
//! The runner is started once per inference with the model descriptor and a
//! weights path as arguments, reads the image from stdin and prints
//! `{"outputs": [{"shape": [...], "data": [...]}, ...]}` on stdout.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread;

use serde::Deserialize;

use super::{InferenceError, Network, NetworkLoader, Tensor};
use crate::config::InferenceConfig;
use crate::model::Model;

#[derive(Deserialize)]
struct RunnerOutput {
    outputs: Vec<Tensor>,
}

/// Loads networks by caching their weights on disk for the runner.
pub struct CommandLoader {
    program: String,
    args: Vec<String>,
    weights_cache: PathBuf,
}

impl CommandLoader {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            weights_cache: config.weights_cache.clone(),
        }
    }

    fn cache_weights(&self, model: &Model, weights: &[u8]) -> Result<PathBuf, InferenceError> {
        std::fs::create_dir_all(&self.weights_cache).map_err(|e| InferenceError::Io {
            path: self.weights_cache.clone(),
            source: e,
        })?;

        let path = self
            .weights_cache
            .join(format!("model-{}-{}.weights", model.id, model.version));
        std::fs::write(&path, weights).map_err(|e| InferenceError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }
}

impl NetworkLoader for CommandLoader {
    fn load(&self, model: &Model, weights: &[u8]) -> Result<Box<dyn Network>, InferenceError> {
        let weights_path = self.cache_weights(model, weights)?;

        let mut args = self.args.clone();
        args.extend([
            "--category".to_string(),
            model.category().to_string(),
            "--type".to_string(),
            model.kind.name().to_string(),
            "--subtype".to_string(),
            model.subtype.clone(),
            "--module".to_string(),
            model.module.clone(),
            "--class".to_string(),
            model.class_name.clone(),
            "--weights".to_string(),
            weights_path.to_string_lossy().into_owned(),
        ]);

        Ok(Box::new(CommandNetwork {
            program: self.program.clone(),
            args,
        }))
    }
}

/// One model behind the runner program.
pub struct CommandNetwork {
    program: String,
    args: Vec<String>,
}

impl CommandNetwork {
    fn run(&self, image: &[u8]) -> Result<Output, InferenceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| InferenceError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        // Feed stdin from another thread so a runner that writes a lot
        // before draining its input cannot deadlock us.
        let writer = child.stdin.take().map(|mut stdin| {
            let image = image.to_vec();
            thread::spawn(move || stdin.write_all(&image))
        });

        let output = child.wait_with_output().map_err(|e| InferenceError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;

        if let Some(Ok(Err(e))) = writer.map(|w| w.join()) {
            // The runner may exit without reading all of stdin.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(InferenceError::Spawn {
                    program: self.program.clone(),
                    source: e,
                });
            }
        }

        Ok(output)
    }
}

impl Network for CommandNetwork {
    fn forward(&self, image: &[u8]) -> Result<Vec<Tensor>, InferenceError> {
        let output = self.run(image)?;

        if !output.status.success() {
            return Err(InferenceError::Runner {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: RunnerOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| InferenceError::MalformedOutput(format!("runner stdout: {}", e)))?;
        for tensor in &parsed.outputs {
            tensor.check()?;
        }
        Ok(parsed.outputs)
    }
}
