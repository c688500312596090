use crate::partition::Layout;
use crate::stencil::{num_slots, shift_of_slot, Shift, Stencil};

/// Neighbor-slot bookkeeping for communications: which inbound halos and
/// outbound borders are active, and the displacement to each slot's
/// neighbor. Rebuilt whenever the layout changes.
#[derive(Clone, Debug)]
pub struct CommArgs {
    pub border_in_active: Vec<bool>,
    pub border_out_active: Vec<bool>,
    /// Displacement toward the neighbor a slot receives from.
    pub shifts_in: Vec<Option<Shift>>,
    /// Displacement toward the neighbor a slot sends to (the negation).
    pub shifts_out: Vec<Option<Shift>>,
}

impl CommArgs {
    /// Border status from the stencil footprint, then neighbor shifts, then
    /// deactivation of every slot whose neighbor lookup comes back empty.
    pub fn new(stencil: &Stencil, lay: &Layout) -> CommArgs {
        let dims = stencil.dims();
        let border_in_active = stencil.active_slots();
        let border_out_active = border_in_active.clone();

        let mut args = CommArgs {
            shifts_in: vec![None; num_slots(dims)],
            shifts_out: vec![None; num_slots(dims)],
            border_in_active,
            border_out_active,
        };
        for slot in 0..num_slots(dims) {
            if !args.border_in_active[slot] {
                continue;
            }
            let shift_in = shift_of_slot(slot, dims);
            let shift_out: Shift = shift_in.iter().map(|&d| -d).collect();
            args.shifts_in[slot] = Some(shift_in);
            args.shifts_out[slot] = Some(shift_out);
        }

        deactivate_empty_neighbors(&mut args.border_in_active, lay, &args.shifts_in);
        deactivate_empty_neighbors(&mut args.border_out_active, lay, &args.shifts_out);
        args
    }

    pub fn num_slots(&self) -> usize {
        self.border_in_active.len()
    }

    /// Slots with either side still active, i.e. slots that appear in the
    /// communication pattern.
    pub fn comm_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_slots())
            .filter(|&s| self.border_in_active[s] || self.border_out_active[s])
    }
}

/// Clear the active flag of every slot whose neighbor does not exist in the
/// layout grid.
fn deactivate_empty_neighbors(active: &mut [bool], lay: &Layout, shifts: &[Option<Shift>]) {
    for (slot, flag) in active.iter_mut().enumerate() {
        if !*flag {
            continue;
        }
        let exists = shifts[slot]
            .as_ref()
            .and_then(|shift| lay.neighbor(shift))
            .is_some();
        if !exists {
            *flag = false;
        }
    }
}
