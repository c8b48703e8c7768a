use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use log::{info, warn};

use crate::error::{EmError, Result};

// target name -> prior pseudo-count (not logged)
pub(crate) type AlphaMap = HashMap<String, f64>;

/*
    Reads a priors file with one "name<tab or space>value" pair per line.
    Lines without a separator are skipped; a value that does not parse is an error.
*/
pub(crate) fn parse_priors(path: &str) -> Result<AlphaMap> {
    let file = File::open(path).map_err(|source| EmError::Priors { path: path.to_string(), source })?;
    let mut alphas = AlphaMap::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| EmError::Priors { path: path.to_string(), source })?;
        let idx = match line.find(|c| c == '\t' || c == ' ') {
            Some(idx) => idx,
            None => continue,
        };
        let (name, value) = (&line[..idx], line[idx + 1..].trim());
        let alpha: f64 = value.parse().map_err(|_| {
            EmError::invalid_parameter("prior-params", format!("bad prior '{}' for target '{}'", value, name))
        })?;
        if !(alpha > 0.0 && alpha.is_finite()) {
            return Err(EmError::invalid_parameter("prior-params", format!("prior for target '{}' must be positive, got {}", name, value)));
        }
        if alphas.insert(name.to_string(), alpha).is_some() {
            warn!("Prior for target '{}' given more than once, keeping the last", name);
        }
    }
    info!("Read {} target priors from {}", alphas.len(), path);
    Ok(alphas)
}
