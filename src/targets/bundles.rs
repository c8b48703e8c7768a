// Union-find over target ids; a bundle is a set of targets linked by ambiguous fragments.
#[derive(Debug)]
pub(crate) struct BundleTable {
    parent: Vec<usize>,
    size: Vec<usize>,
    num_bundles: usize,
}

impl BundleTable {
    pub(crate) fn new(num_targets: usize) -> BundleTable {
        BundleTable { parent: (0..num_targets).collect(), size: vec![1; num_targets], num_bundles: num_targets }
    }

    fn find(&mut self, mut id: usize) -> usize {
        while self.parent[id] != id {
            self.parent[id] = self.parent[self.parent[id]];
            id = self.parent[id];
        }
        id
    }

    pub(crate) fn merge(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        // smaller bundle joins the larger one
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        self.num_bundles -= 1;
    }

    pub(crate) fn num_bundles(&self) -> usize {
        self.num_bundles
    }
}
