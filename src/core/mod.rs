// Domain-layer modules and shared models
pub mod workflow {
    pub use crate::workflow::*;
}

pub mod wizard {
    pub use crate::wizard::*;
}

pub mod models {
    pub use crate::models::*;
}
