pub mod quality_assessor;
