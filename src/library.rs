use std::sync::Arc;

use crate::models::{LibraryModels, MassPropagator};
use crate::readers::MapParser;
use crate::targets::TargetTable;

/*
    One alignment input together with the models learned from it.

    n: fragments this library has seen over the whole run, starting at 1
    mass_n: log mass the next fragment of this library is given
*/
pub(crate) struct Library {
    pub(crate) in_file_name: String,
    pub(crate) parser: MapParser,
    pub(crate) models: LibraryModels,
    pub(crate) n: usize,
    pub(crate) mass_n: f64,
}

impl Library {
    pub(crate) fn new(in_file_name: String, parser: MapParser, models: LibraryModels) -> Library {
        Library { in_file_name, parser, models, n: 1, mass_n: 0.0 }
    }
}

/*
    What one pass over one library works on. The library's own state is borrowed
    mutably; the models of every library stay readable for intermediate output.
*/
pub(crate) struct PassParts<'a> {
    pub(crate) in_file_name: &'a str,
    pub(crate) parser: &'a mut MapParser,
    pub(crate) models: &'a LibraryModels,
    pub(crate) n: &'a mut usize,
    pub(crate) mass_n: &'a mut f64,
    pub(crate) all_models: Vec<&'a LibraryModels>,
    pub(crate) targets: &'a TargetTable,
    pub(crate) propagator: &'a dyn MassPropagator,
}

// All libraries of a run and the target store and propagator they share.
pub(crate) struct Librarian {
    libs: Vec<Library>,
    targets: Arc<TargetTable>,
    propagator: Box<dyn MassPropagator>,
    curr: usize,
}

impl Librarian {
    pub(crate) fn new(libs: Vec<Library>, targets: Arc<TargetTable>, propagator: Box<dyn MassPropagator>) -> Librarian {
        Librarian { libs, targets, propagator, curr: 0 }
    }

    pub(crate) fn size(&self) -> usize {
        self.libs.len()
    }

    pub(crate) fn set_curr(&mut self, l: usize) {
        self.curr = l;
    }

    pub(crate) fn curr_lib(&self) -> &Library {
        &self.libs[self.curr]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Library> {
        self.libs.iter()
    }

    pub(crate) fn targets(&self) -> &TargetTable {
        &self.targets
    }

    // library l split up for a pass over it, next to the shared state the pass reads
    pub(crate) fn pass_parts(&mut self, l: usize) -> PassParts<'_> {
        let mut parts: Vec<_> = self.libs.iter_mut()
            .map(|lib| {
                let Library { in_file_name, parser, models, n, mass_n } = lib;
                let in_file_name: &str = in_file_name;
                let models: &LibraryModels = models;
                (in_file_name, parser, models, n, mass_n)
            })
            .collect();
        let all_models = parts.iter().map(|p| p.2).collect();
        let (in_file_name, parser, models, n, mass_n) = parts.swap_remove(l);
        PassParts {
            in_file_name, parser, models, n, mass_n, all_models,
            targets: &self.targets,
            propagator: self.propagator.as_ref(),
        }
    }

    // every parser writes alignments only on the last round and starts over from its first record
    pub(crate) fn prepare_round(&mut self, last_round: bool) {
        for lib in &mut self.libs {
            lib.parser.write_active(last_round);
            lib.parser.reset_reader();
        }
    }
}
