//! Clone trees stored as parent vectors.
//!
//! Clone nodes are `0..k`; index `k` is the root, the normal background.
//! Every node, root included, owns a proportion of the sampled cells. A
//! node's cell fraction is the sum of the proportions in its subtree, so
//! fractions never increase from parent to child and the children of a node
//! never hold more cells than the node itself.

use rand::Rng;
use rand_distr::{Dirichlet, Distribution};
use serde::Serialize;

/// Tolerance for proportion sums and fraction comparisons.
pub const FRACTION_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloneTree {
    parents: Vec<usize>,
    proportions: Vec<f64>,
    assignment: Vec<usize>,
}

/// Topology plus cluster-to-edge assignment; cell fractions are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConfigurationKey {
    pub parents: Vec<usize>,
    pub assignment: Vec<usize>,
}

impl CloneTree {
    /// Build a tree without checking it; see [`CloneTree::validate`].
    pub fn from_parts(parents: Vec<usize>, proportions: Vec<f64>, assignment: Vec<usize>) -> Self {
        Self {
            parents,
            proportions,
            assignment,
        }
    }

    /// Random topology, Dirichlet(1) proportions and uniform assignment.
    pub fn random(k: usize, n_clusters: usize, rng: &mut impl Rng) -> Self {
        let parents = random_parent_vec(k, rng);
        let proportions = random_proportions(k + 1, rng);
        let assignment = (0..n_clusters).map(|_| rng.gen_range(0..k)).collect();
        Self {
            parents,
            proportions,
            assignment,
        }
    }

    pub fn n_clones(&self) -> usize {
        self.parents.len()
    }

    pub fn root(&self) -> usize {
        self.parents.len()
    }

    pub fn n_clusters(&self) -> usize {
        self.assignment.len()
    }

    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parents.get(node).copied()
    }

    pub fn proportions(&self) -> &[f64] {
        &self.proportions
    }

    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    /// Clone node whose incoming edge carries cluster `cluster` (0-based).
    pub fn node_of_cluster(&self, cluster: usize) -> usize {
        self.assignment[cluster]
    }

    pub fn clusters_on(&self, node: usize) -> Vec<usize> {
        (0..self.assignment.len())
            .filter(|&c| self.assignment[c] == node)
            .collect()
    }

    pub fn key(&self) -> ConfigurationKey {
        ConfigurationKey {
            parents: self.parents.clone(),
            assignment: self.assignment.clone(),
        }
    }

    pub(crate) fn parents_mut(&mut self) -> &mut Vec<usize> {
        &mut self.parents
    }

    pub(crate) fn proportions_mut(&mut self) -> &mut Vec<f64> {
        &mut self.proportions
    }

    pub(crate) fn assignment_mut(&mut self) -> &mut Vec<usize> {
        &mut self.assignment
    }

    /// Children of every node, root included, in increasing index order.
    pub fn child_lists(&self) -> Vec<Vec<usize>> {
        let k = self.n_clones();
        let mut children = vec![Vec::new(); k + 1];
        for (node, &parent) in self.parents.iter().enumerate() {
            children[parent].push(node);
        }
        children
    }

    /// Breadth-first order starting at the root.
    pub fn breadth_first(&self) -> Vec<usize> {
        let k = self.n_clones();
        let children = self.child_lists();
        let mut order = vec![k];
        let mut i = 0;
        while i < order.len() && order.len() < k + 1 {
            let node = order[i];
            order.extend(children[node].iter().copied());
            i += 1;
        }
        order
    }

    /// `anc[i][j]` is true when clone `i` is an ancestor of (or equal to) clone `j`.
    pub fn ancestor_matrix(&self) -> Vec<Vec<bool>> {
        let k = self.n_clones();
        let mut anc = vec![vec![false; k]; k];
        for node in 0..k {
            anc[node][node] = true;
            let mut current = node;
            let mut hops = 0;
            while self.parents[current] < k && hops < k {
                current = self.parents[current];
                anc[current][node] = true;
                hops += 1;
            }
        }
        anc
    }

    /// Cell fraction of every node, root included; the root's is the total
    /// proportion mass.
    pub fn cell_fractions(&self) -> Vec<f64> {
        let mut fractions = self.proportions.clone();
        for &node in self.breadth_first().iter().rev() {
            if node < self.n_clones() {
                let parent = self.parents[node];
                fractions[parent] += fractions[node];
            }
        }
        fractions
    }

    /// VAF implied for each cluster: half the cell fraction below its edge,
    /// assuming heterozygous mutations in diploid cells.
    pub fn implied_vafs(&self) -> Vec<f64> {
        let fractions = self.cell_fractions();
        self.assignment
            .iter()
            .map(|&node| fractions[node] / 2.0)
            .collect()
    }

    /// Check every structural invariant; the message names the first failure.
    pub fn validate(&self) -> Result<(), String> {
        let k = self.n_clones();
        if self.proportions.len() != k + 1 {
            return Err(format!(
                "{} proportions for {} nodes",
                self.proportions.len(),
                k + 1
            ));
        }
        for (node, &parent) in self.parents.iter().enumerate() {
            if parent > k || parent == node {
                return Err(format!("clone {} has invalid parent {}", node, parent));
            }
        }
        for node in 0..k {
            let mut current = node;
            let mut hops = 0;
            while current != k {
                current = self.parents[current];
                hops += 1;
                if hops > k {
                    return Err(format!("clone {} does not reach the root", node));
                }
            }
        }
        if let Some(p) = self.proportions.iter().find(|p| !(**p >= 0.0)) {
            return Err(format!("negative or undefined proportion {}", p));
        }
        let total: f64 = self.proportions.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(format!("proportions sum to {}", total));
        }
        if let Some(&node) = self.assignment.iter().find(|&&node| node >= k) {
            return Err(format!("cluster assigned to non-clone node {}", node));
        }
        let fractions = self.cell_fractions();
        for (node, &parent) in self.parents.iter().enumerate() {
            if fractions[node] > fractions[parent] + FRACTION_EPSILON {
                return Err(format!(
                    "clone {} holds {} cells, above its parent's {}",
                    node, fractions[node], fractions[parent]
                ));
            }
        }
        Ok(())
    }

    /// Relabel clones so that trees equal up to clone labels become equal.
    ///
    /// Clones are numbered in depth-first preorder, visiting children
    /// ordered by an encoding of their subtree structure and clusters.
    pub fn canonical(&self) -> CloneTree {
        let k = self.n_clones();
        let children = self.child_lists();
        let clusters: Vec<Vec<usize>> = (0..=k).map(|n| self.clusters_on(n)).collect();

        let mut codes = vec![String::new(); k + 1];
        for &node in self.breadth_first().iter().rev() {
            let mut child_codes: Vec<&str> =
                children[node].iter().map(|&c| codes[c].as_str()).collect();
            child_codes.sort_unstable();
            let mut code = String::from("(");
            code.push_str(
                &clusters[node]
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            );
            code.push(':');
            for c in child_codes {
                code.push_str(c);
            }
            code.push(')');
            codes[node] = code;
        }

        let mut new_label = vec![k; k + 1];
        let mut next = 0;
        let mut stack = vec![k];
        while let Some(node) = stack.pop() {
            if node != k {
                new_label[node] = next;
                next += 1;
            }
            let mut kids = children[node].clone();
            kids.sort_by(|a, b| codes[*a].cmp(&codes[*b]));
            stack.extend(kids.into_iter().rev());
        }

        let mut parents = vec![k; k];
        let mut proportions = vec![0.0; k + 1];
        proportions[k] = self.proportions[k];
        for node in 0..k {
            parents[new_label[node]] = new_label[self.parents[node]];
            proportions[new_label[node]] = self.proportions[node];
        }
        let assignment = self.assignment.iter().map(|&n| new_label[n]).collect();
        CloneTree {
            parents,
            proportions,
            assignment,
        }
    }
}

pub fn random_proportions(n: usize, rng: &mut impl Rng) -> Vec<f64> {
    if n < 2 {
        return vec![1.0; n];
    }
    match Dirichlet::new(&vec![1.0; n]) {
        Ok(dirichlet) => dirichlet.sample(rng),
        Err(_) => vec![1.0 / n as f64; n],
    }
}

/// Uniformly random rooted tree on `k` clones via a random Pruefer code over
/// the `k + 1` nodes, rooted at node `k`.
pub fn random_parent_vec(k: usize, rng: &mut impl Rng) -> Vec<usize> {
    let n_nodes = k + 1;
    if k == 0 {
        return Vec::new();
    }
    let code: Vec<usize> = (0..n_nodes.saturating_sub(2))
        .map(|_| rng.gen_range(0..n_nodes))
        .collect();
    pruefer_to_parent_vec(&code, k)
}

/// Decode a Pruefer code over nodes `0..=k` and orient the edges towards `k`.
pub fn pruefer_to_parent_vec(code: &[usize], k: usize) -> Vec<usize> {
    let n_nodes = k + 1;
    let mut degree = vec![1usize; n_nodes];
    for &node in code {
        degree[node] += 1;
    }
    let mut adjacency = vec![Vec::new(); n_nodes];
    for &node in code {
        let leaf = (0..n_nodes)
            .find(|&i| degree[i] == 1)
            .unwrap_or(n_nodes - 1);
        adjacency[leaf].push(node);
        adjacency[node].push(leaf);
        degree[leaf] -= 1;
        degree[node] -= 1;
    }
    let last: Vec<usize> = (0..n_nodes).filter(|&i| degree[i] == 1).collect();
    if let [a, b] = last[..] {
        adjacency[a].push(b);
        adjacency[b].push(a);
    }

    let mut parents = vec![k; k];
    let mut visited = vec![false; n_nodes];
    visited[k] = true;
    let mut queue = std::collections::VecDeque::from([k]);
    while let Some(node) = queue.pop_front() {
        for &next in &adjacency[node] {
            if !visited[next] {
                visited[next] = true;
                parents[next] = node;
                queue.push_back(next);
            }
        }
    }
    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn chain_tree() -> CloneTree {
        // root(3) -> 0 -> 1 -> 2
        CloneTree::from_parts(vec![3, 0, 1], vec![0.1, 0.2, 0.3, 0.4], vec![0, 2])
    }

    #[test]
    fn cell_fractions_sum_subtrees() {
        let tree = chain_tree();
        let f = tree.cell_fractions();
        assert_relative_eq!(f[2], 0.3);
        assert_relative_eq!(f[1], 0.5);
        assert_relative_eq!(f[0], 0.6);
        assert_relative_eq!(f[3], 1.0);
        let vafs = tree.implied_vafs();
        assert_relative_eq!(vafs[0], 0.3);
        assert_relative_eq!(vafs[1], 0.15);
    }

    #[test]
    fn ancestor_matrix_of_chain() {
        let anc = chain_tree().ancestor_matrix();
        assert!(anc[0][2] && anc[1][2] && anc[0][1]);
        assert!(!anc[2][0] && !anc[1][0]);
        assert!(anc[1][1]);
    }

    #[test]
    fn validate_rejects_cycles_and_bad_proportions() {
        let cyclic = CloneTree::from_parts(vec![1, 0], vec![0.3, 0.3, 0.4], vec![0]);
        assert!(cyclic.validate().is_err());
        let negative = CloneTree::from_parts(vec![2, 2], vec![-0.1, 0.6, 0.5], vec![0]);
        assert!(negative.validate().is_err());
        let off_tree = CloneTree::from_parts(vec![2, 2], vec![0.3, 0.3, 0.4], vec![2]);
        assert!(off_tree.validate().is_err());
        assert!(chain_tree().validate().is_ok());
    }

    #[test]
    fn pruefer_decoding_of_star_and_path() {
        // code [3, 3] over 4 nodes: every clone hangs off the root
        assert_eq!(pruefer_to_parent_vec(&[3, 3], 3), vec![3, 3, 3]);
        // code [1, 2]: 0-1, 1-2, 2-3
        assert_eq!(pruefer_to_parent_vec(&[1, 2], 3), vec![1, 2, 3]);
    }

    #[test]
    fn canonical_form_ignores_clone_labels() {
        // root(2) -> 0 -> 1 with clusters on 1 then 0
        let a = CloneTree::from_parts(vec![2, 0], vec![0.2, 0.3, 0.5], vec![1, 0]);
        // same phylogeny with the two clone labels swapped
        let b = CloneTree::from_parts(vec![1, 2], vec![0.3, 0.2, 0.5], vec![0, 1]);
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical().key(), b.canonical().key());
        let linear = a.canonical();
        let branching = CloneTree::from_parts(vec![2, 2], vec![0.2, 0.3, 0.5], vec![1, 0]);
        assert_ne!(linear.key(), branching.canonical().key());
    }

    #[quickcheck]
    fn random_trees_are_valid(k: u8, clusters: u8, seed: u64) -> bool {
        let k = (k % 8) as usize + 1;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let tree = CloneTree::random(k, clusters as usize % 6, &mut rng);
        tree.validate().is_ok() && tree.canonical().validate().is_ok()
    }

    #[quickcheck]
    fn canonical_preserves_cell_fractions_of_clusters(k: u8, seed: u64) -> bool {
        let k = (k % 6) as usize + 1;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let tree = CloneTree::random(k, 4, &mut rng);
        let canonical = tree.canonical();
        tree.implied_vafs()
            .iter()
            .zip(canonical.implied_vafs())
            .all(|(a, b)| (a - b).abs() < 1e-12)
            && canonical.canonical() == canonical
    }
}
