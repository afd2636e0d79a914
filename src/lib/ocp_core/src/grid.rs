//! `Grid`: structured-cell geometry and the active-cell map.
//!
//! Grid geometry construction is a named external collaborator;
//! this module is the minimal concrete shape that collaborator hands to
//! `Bulk::setup` — per-cell size, depth, net-to-gross, porosity,
//! permeability, and SATNUM/PVTNUM/ROCKNUM region indices, with fluid state
//! kept out of this struct and owned by `Bulk` instead.
//! The grid itself never changes after setup.

use serde::{Deserialize, Serialize};

/// Static, read-only geometry and region assignment for one structured
/// cell. `satnum`/`pvtnum`/`rocknum` index into the per-region relperm,
/// PVT, and rock-compaction tables.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct CellGeometry {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    /// Net-to-gross ratio, dimensionless [0,1].
    pub ntg: f64,
    pub porosity: f64,
    pub perm_x: f64,
    pub perm_y: f64,
    pub perm_z: f64,
    /// Depth of the cell center below a common datum [ft].
    pub depth: f64,
    pub satnum: usize,
    pub pvtnum: usize,
    pub rocknum: usize,
    /// False for inactive cells (NTG == 0 or explicitly deactivated); these
    /// are excluded from `Bulk`/`Connection` but keep their grid index so
    /// neighbour lookups stay simple index arithmetic.
    pub active: bool,
}

impl CellGeometry {
    /// Bulk volume [ft3] = dx * dy * dz (gross, before net-to-gross).
    pub fn bulk_volume(&self) -> f64 {
        self.dx * self.dy * self.dz
    }

    /// Geometric (static) pore volume [rb], ignoring pressure-dependent
    /// rock compressibility: `Vb * NTG * phi`. `Bulk::rock_pore_volume`
    /// applies the pressure-dependent multiplier on top of this.
    pub fn static_pore_volume(&self) -> f64 {
        self.bulk_volume() * self.ntg * self.porosity
    }
}

/// The structured Cartesian grid plus active-cell bookkeeping. `Bulk` is
/// sized to the active-cell count (`Nb`) at setup and never grows; `Grid`
/// retains the full `nx*ny*nz` index space so neighbour lookups in
/// `Connection` can be done by simple `(i, j, k)` arithmetic even though
/// only active cells carry fluid state.
#[derive(Clone, Debug)]
pub struct Grid {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    cells: Vec<CellGeometry>,
    /// Maps a full grid index to its position in the active-cell state
    /// vectors (`Bulk`), or `None` if the cell is inactive.
    active_index: Vec<Option<usize>>,
}

impl Grid {
    pub fn new(nx: usize, ny: usize, nz: usize, cells: Vec<CellGeometry>) -> Self {
        assert_eq!(cells.len(), nx * ny * nz, "grid cell count mismatch");
        let mut next = 0usize;
        let active_index = cells
            .iter()
            .map(|c| {
                if c.active {
                    let idx = next;
                    next += 1;
                    Some(idx)
                } else {
                    None
                }
            })
            .collect();
        Grid {
            nx,
            ny,
            nz,
            cells,
            active_index,
        }
    }

    /// Uniform test/demo grid: all cells active with identical geometry.
    pub fn uniform(nx: usize, ny: usize, nz: usize, cell: CellGeometry) -> Self {
        Self::new(nx, ny, nz, vec![cell; nx * ny * nz])
    }

    pub fn grid_index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.nx * self.ny) + (j * self.nx) + i
    }

    pub fn geometry(&self, grid_idx: usize) -> &CellGeometry {
        &self.cells[grid_idx]
    }

    pub fn active_bulk_index(&self, grid_idx: usize) -> Option<usize> {
        self.active_index[grid_idx]
    }

    pub fn num_active(&self) -> usize {
        self.active_index.iter().filter(|x| x.is_some()).count()
    }

    pub fn num_total(&self) -> usize {
        self.cells.len()
    }

    /// Active-cell geometries in bulk order (index 0..Nb-1), the layout
    /// `Bulk::setup` copies from.
    pub fn active_geometries(&self) -> Vec<&CellGeometry> {
        let mut out: Vec<(usize, &CellGeometry)> = self
            .cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.active)
            .collect();
        out.sort_by_key(|(i, _)| *i);
        out.into_iter().map(|(_, c)| c).collect()
    }

    /// Structured neighbours of `(i, j, k)`, each tagged with the
    /// connecting direction and both grid indices (not yet filtered to
    /// active cells — callers check `active_bulk_index`).
    pub fn neighbors(&self, i: usize, j: usize, k: usize) -> Vec<(usize, char)> {
        let mut out = Vec::with_capacity(6);
        if i > 0 {
            out.push((self.grid_index(i - 1, j, k), 'x'));
        }
        if i + 1 < self.nx {
            out.push((self.grid_index(i + 1, j, k), 'x'));
        }
        if j > 0 {
            out.push((self.grid_index(i, j - 1, k), 'y'));
        }
        if j + 1 < self.ny {
            out.push((self.grid_index(i, j + 1, k), 'y'));
        }
        if k > 0 {
            out.push((self.grid_index(i, j, k - 1), 'z'));
        }
        if k + 1 < self.nz {
            out.push((self.grid_index(i, j, k + 1), 'z'));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> CellGeometry {
        CellGeometry {
            dx: 100.0,
            dy: 100.0,
            dz: 20.0,
            ntg: 1.0,
            porosity: 0.2,
            perm_x: 100.0,
            perm_y: 100.0,
            perm_z: 10.0,
            depth: 8000.0,
            satnum: 0,
            pvtnum: 0,
            rocknum: 0,
            active: true,
        }
    }

    #[test]
    fn inactive_cells_are_excluded_from_bulk_numbering() {
        let mut cells = vec![cell(); 4];
        cells[1].active = false;
        let grid = Grid::new(2, 2, 1, cells);
        assert_eq!(grid.num_active(), 3);
        assert_eq!(grid.active_bulk_index(0), Some(0));
        assert_eq!(grid.active_bulk_index(1), None);
        assert_eq!(grid.active_bulk_index(2), Some(1));
        assert_eq!(grid.active_bulk_index(3), Some(2));
    }

    #[test]
    fn neighbors_skip_out_of_bounds() {
        let grid = Grid::uniform(2, 2, 1, cell());
        let n = grid.neighbors(0, 0, 0);
        assert_eq!(n.len(), 2);
    }
}
