//! CPU execution engine for the LC-3.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use crate::cpu::decode::{self, DecodeError, Instruction, Operand};
use crate::cpu::registers::Reg;
use crate::cpu::trap::{self, TrapOutcome};
use crate::cpu::{Memory, Registers};
use crate::image::Image;
use crate::io::Console;
use serde::{Serialize, Deserialize};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Instructions executed between calls to [`Console::pump`] in [`Cpu::run_until`].
pub const PUMP_INTERVAL: u64 = 1024;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed the HALT trap).
    Halted,
    /// CPU hit an instruction it cannot execute.
    Faulted,
}

/// Why a bounded run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Halted,
    CycleLimit,
    Cancelled,
}

/// Result of [`Cpu::run_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: u64,
    pub reason: StopReason,
}

/// Serializable view of the machine, without memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub registers: Registers,
    pub state: CpuState,
    pub cycles: u64,
}

/// The LC-3 CPU.
#[derive(Clone)]
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count.
    pub cycles: u64,
}

impl Cpu {
    /// Create a new CPU in its power-on state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
        }
    }

    /// Copy a program image into memory at its origin.
    pub fn load_image(&mut self, image: &Image) {
        self.mem.load(image.origin, &image.words);
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed, or an error. A decode
    /// failure moves the CPU to [`CpuState::Faulted`].
    pub fn step(&mut self, console: &mut dyn Console) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        // Fetch
        let pc = self.regs.pc;
        let word = self.mem.read(pc, console)?;
        self.regs.advance_pc();

        // Decode
        let instr = match decode::decode(word) {
            Ok(instr) => instr,
            Err(source) => {
                self.state = CpuState::Faulted;
                return Err(CpuError::Fault { pc, word, source });
            }
        };

        // Execute
        self.execute(instr, console)?;

        self.cycles += 1;

        Ok(instr)
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self, console: &mut dyn Console) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step(console)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64, console: &mut dyn Console) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.step(console)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run until halt, an optional instruction budget runs out, or `cancel`
    /// is raised. The flag is checked before every fetch, and the console is
    /// pumped every [`PUMP_INTERVAL`] instructions so it can raise the flag
    /// even when the program never touches the keyboard.
    ///
    /// An interrupted console read while `cancel` is raised also counts as
    /// cancellation rather than an error.
    pub fn run_until(
        &mut self,
        max_cycles: Option<u64>,
        cancel: &AtomicBool,
        console: &mut dyn Console,
    ) -> Result<RunSummary, CpuError> {
        self.run_until_with(max_cycles, cancel, console, |_| {})
    }

    /// [`Cpu::run_until`], calling `inspect` before each instruction is fetched.
    pub fn run_until_with(
        &mut self,
        max_cycles: Option<u64>,
        cancel: &AtomicBool,
        console: &mut dyn Console,
        mut inspect: impl FnMut(&Cpu),
    ) -> Result<RunSummary, CpuError> {
        let start_cycles = self.cycles;
        let limit = max_cycles.map(|max| self.cycles.saturating_add(max));
        let summary = |cpu: &Cpu, reason| RunSummary { executed: cpu.cycles - start_cycles, reason };

        loop {
            if self.state != CpuState::Running {
                return Ok(summary(self, StopReason::Halted));
            }
            if (self.cycles - start_cycles) % PUMP_INTERVAL == 0 {
                console.pump()?;
            }
            if cancel.load(Ordering::SeqCst) {
                return Ok(summary(self, StopReason::Cancelled));
            }
            if limit.is_some_and(|limit| self.cycles >= limit) {
                return Ok(summary(self, StopReason::CycleLimit));
            }

            inspect(self);
            match self.step(console) {
                Ok(_) => {}
                Err(CpuError::Io(e))
                    if e.kind() == io::ErrorKind::Interrupted && cancel.load(Ordering::SeqCst) =>
                {
                    return Ok(summary(self, StopReason::Cancelled));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction, console: &mut dyn Console) -> Result<(), CpuError> {
        let pc = self.regs.pc;

        match instr {
            // ==================== Operate ====================

            Instruction::Add { dr, sr1, op2 } => {
                let value = self.regs.read(sr1).wrapping_add(self.operand(op2));
                self.regs.write_and_flag(dr, value);
            }

            Instruction::And { dr, sr1, op2 } => {
                let value = self.regs.read(sr1) & self.operand(op2);
                self.regs.write_and_flag(dr, value);
            }

            Instruction::Not { dr, sr } => {
                let value = !self.regs.read(sr);
                self.regs.write_and_flag(dr, value);
            }

            // ==================== Data Movement ====================

            Instruction::Ld { dr, offset } => {
                let value = self.mem.read(pc.wrapping_add(offset), console)?;
                self.regs.write_and_flag(dr, value);
            }

            Instruction::Ldi { dr, offset } => {
                let addr = self.mem.read(pc.wrapping_add(offset), console)?;
                let value = self.mem.read(addr, console)?;
                self.regs.write_and_flag(dr, value);
            }

            Instruction::Ldr { dr, base, offset } => {
                let addr = self.regs.read(base).wrapping_add(offset);
                let value = self.mem.read(addr, console)?;
                self.regs.write_and_flag(dr, value);
            }

            Instruction::Lea { dr, offset } => {
                self.regs.write_and_flag(dr, pc.wrapping_add(offset));
            }

            Instruction::St { sr, offset } => {
                self.mem.write(pc.wrapping_add(offset), self.regs.read(sr));
            }

            Instruction::Sti { sr, offset } => {
                let addr = self.mem.read(pc.wrapping_add(offset), console)?;
                self.mem.write(addr, self.regs.read(sr));
            }

            Instruction::Str { sr, base, offset } => {
                let addr = self.regs.read(base).wrapping_add(offset);
                self.mem.write(addr, self.regs.read(sr));
            }

            // ==================== Control ====================

            Instruction::Br { nzp, offset } => {
                if self.regs.matches(nzp) {
                    self.regs.pc = pc.wrapping_add(offset);
                }
            }

            Instruction::Jmp { base } => {
                self.regs.pc = self.regs.read(base);
            }

            Instruction::Jsr { offset } => {
                self.regs.write(Reg::R7, pc);
                self.regs.pc = pc.wrapping_add(offset);
            }

            Instruction::Jsrr { base } => {
                // R7 is written first, so JSRR R7 continues at the next instruction.
                self.regs.write(Reg::R7, pc);
                self.regs.pc = self.regs.read(base);
            }

            Instruction::Trap { vector } => {
                self.regs.write(Reg::R7, pc);
                if trap::dispatch(vector, &mut self.regs, &self.mem, console)? == TrapOutcome::Halt {
                    self.state = CpuState::Halted;
                }
            }
        }

        Ok(())
    }

    fn operand(&self, op2: Operand) -> u16 {
        match op2 {
            Operand::Reg(sr2) => self.regs.read(sr2),
            Operand::Imm(imm) => imm,
        }
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            registers: self.regs.clone(),
            state: self.state,
            cycles: self.cycles,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("fault at {pc:#06x} (instruction {word:#06x}): {source}")]
    Fault {
        pc: u16,
        word: u16,
        #[source]
        source: DecodeError,
    },

    #[error("console I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use crate::cpu::registers::{Flag, PC_START};
    use crate::cpu::trap::TrapVector;
    use crate::io::BufferConsole;
    use proptest::prelude::*;

    const HALT: Instruction = Instruction::Trap { vector: TrapVector::Halt };

    fn r(n: u16) -> Reg {
        Reg::from_bits(n)
    }

    fn make_program(instructions: &[Instruction]) -> Vec<u16> {
        instructions.iter().map(encode).collect()
    }

    fn cpu_with(instructions: &[Instruction]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.mem.load(PC_START, &make_program(instructions));
        cpu
    }

    fn assert_one_hot(cpu: &Cpu, value: u16) {
        let bits = cpu.regs.flags().bits();
        assert_eq!(bits.count_ones(), 1);
        assert_eq!(cpu.regs.flags(), Flag::for_value(value));
    }

    #[test]
    fn test_cpu_halt() {
        let mut cpu = cpu_with(&[HALT]);
        let mut console = BufferConsole::new();

        let executed = cpu.run(&mut console).unwrap();

        assert_eq!(executed, 1);
        assert_eq!(cpu.state, CpuState::Halted);
        assert_eq!(console.output_string(), "HALT\n");
    }

    #[test]
    fn test_step_after_halt_is_error() {
        let mut cpu = cpu_with(&[HALT]);
        let mut console = BufferConsole::new();
        cpu.run(&mut console).unwrap();

        assert!(matches!(cpu.step(&mut console), Err(CpuError::NotRunning(CpuState::Halted))));
    }

    #[test]
    fn test_add_register_and_immediate() {
        let mut cpu = cpu_with(&[
            Instruction::Add { dr: r(1), sr1: r(1), op2: Operand::Imm(5) },
            Instruction::Add { dr: r(2), sr1: r(1), op2: Operand::Imm(0xFFF0) },
            Instruction::Add { dr: r(3), sr1: r(1), op2: Operand::Reg(r(2)) },
            HALT,
        ]);
        cpu.run(&mut BufferConsole::new()).unwrap();

        assert_eq!(cpu.regs.read(r(1)), 5);
        assert_eq!(cpu.regs.read(r(2)), 0xFFF5);
        assert_eq!(cpu.regs.read(r(3)), 0xFFFA);
        assert_eq!(cpu.regs.flags(), Flag::Neg);
    }

    #[test]
    fn test_add_wraps() {
        let mut cpu = cpu_with(&[
            Instruction::Add { dr: r(0), sr1: r(0), op2: Operand::Imm(1) },
            HALT,
        ]);
        cpu.regs.write(r(0), 0xFFFF);
        cpu.step(&mut BufferConsole::new()).unwrap();

        assert_eq!(cpu.regs.read(r(0)), 0);
        assert_eq!(cpu.regs.flags(), Flag::Zro);
    }

    #[test]
    fn test_and_not() {
        let mut cpu = cpu_with(&[
            Instruction::And { dr: r(0), sr1: r(1), op2: Operand::Reg(r(2)) },
            Instruction::Not { dr: r(3), sr: r(0) },
            Instruction::And { dr: r(4), sr1: r(3), op2: Operand::Imm(0) },
            HALT,
        ]);
        cpu.regs.write(r(1), 0b1100);
        cpu.regs.write(r(2), 0b1010);
        let mut console = BufferConsole::new();

        cpu.step(&mut console).unwrap();
        assert_eq!(cpu.regs.read(r(0)), 0b1000);
        assert_eq!(cpu.regs.flags(), Flag::Pos);

        cpu.step(&mut console).unwrap();
        assert_eq!(cpu.regs.read(r(3)), 0xFFF7);
        assert_eq!(cpu.regs.flags(), Flag::Neg);

        cpu.step(&mut console).unwrap();
        assert_eq!(cpu.regs.read(r(4)), 0);
        assert_eq!(cpu.regs.flags(), Flag::Zro);
    }

    #[test]
    fn test_branch_taken_and_not_taken() {
        let mut cpu = cpu_with(&[
            Instruction::Add { dr: r(0), sr1: r(0), op2: Operand::Imm(0xFFFF) }, // R0 = -1
            Instruction::Br { nzp: 0b011, offset: 1 },                           // BRzp: not taken
            Instruction::Br { nzp: 0b100, offset: 1 },                           // BRn: taken
            Instruction::Add { dr: r(1), sr1: r(1), op2: Operand::Imm(1) },      // skipped
            HALT,
        ]);

        let executed = cpu.run(&mut BufferConsole::new()).unwrap();

        assert_eq!(executed, 4);
        assert_eq!(cpu.regs.read(r(1)), 0);
    }

    #[test]
    fn test_branch_backwards_loop() {
        // Count R1 down from 3, incrementing R2 each time.
        let mut cpu = cpu_with(&[
            Instruction::Add { dr: r(1), sr1: r(1), op2: Operand::Imm(3) },
            Instruction::Add { dr: r(2), sr1: r(2), op2: Operand::Imm(1) },
            Instruction::Add { dr: r(1), sr1: r(1), op2: Operand::Imm(0xFFFF) },
            Instruction::Br { nzp: 0b001, offset: 0xFFFD },
            HALT,
        ]);

        cpu.run(&mut BufferConsole::new()).unwrap();

        assert_eq!(cpu.regs.read(r(2)), 3);
        assert_eq!(cpu.regs.read(r(1)), 0);
    }

    #[test]
    fn test_br_with_empty_mask_never_branches() {
        let mut cpu = cpu_with(&[Instruction::Br { nzp: 0, offset: 5 }, HALT]);
        cpu.step(&mut BufferConsole::new()).unwrap();
        assert_eq!(cpu.regs.pc, PC_START + 1);
    }

    #[test]
    fn test_loads() {
        let mut cpu = cpu_with(&[
            Instruction::Ld { dr: r(0), offset: 4 },
            Instruction::Ldi { dr: r(1), offset: 4 },
            Instruction::Ldr { dr: r(2), base: r(5), offset: 0xFFFF },
            Instruction::Lea { dr: r(3), offset: 0xFFFD },
            HALT,
        ]);
        cpu.mem.write(0x3005, 0x1234); // LD target
        cpu.mem.write(0x3006, 0x4000); // LDI pointer
        cpu.mem.write(0x4000, 0x8001);
        cpu.mem.write(0x4FFF, 0x0042); // LDR target
        cpu.regs.write(r(5), 0x5000);

        cpu.run(&mut BufferConsole::new()).unwrap();

        assert_eq!(cpu.regs.read(r(0)), 0x1234);
        assert_eq!(cpu.regs.read(r(1)), 0x8001);
        assert_eq!(cpu.regs.read(r(2)), 0x0042);
        assert_eq!(cpu.regs.read(r(3)), 0x3001);
        assert_eq!(cpu.regs.flags(), Flag::Pos);
    }

    #[test]
    fn test_stores() {
        let mut cpu = cpu_with(&[
            Instruction::St { sr: r(1), offset: 10 },
            Instruction::Sti { sr: r(2), offset: 10 },
            Instruction::Str { sr: r(3), base: r(4), offset: 2 },
            HALT,
        ]);
        cpu.regs.write(r(1), 0xAAAA);
        cpu.regs.write(r(2), 0xBBBB);
        cpu.regs.write(r(3), 0xCCCC);
        cpu.regs.write(r(4), 0x6000);
        cpu.mem.write(0x300C, 0x7000);

        cpu.run(&mut BufferConsole::new()).unwrap();

        assert_eq!(cpu.mem.peek(0x300B), 0xAAAA);
        assert_eq!(cpu.mem.peek(0x7000), 0xBBBB);
        assert_eq!(cpu.mem.peek(0x6002), 0xCCCC);
        // Stores leave the flags alone.
        assert_eq!(cpu.regs.flags(), Flag::Zro);
    }

    #[test]
    fn test_jsr_and_ret() {
        let mut cpu = cpu_with(&[
            Instruction::Jsr { offset: 2 },
            HALT,
            HALT,
            Instruction::Add { dr: r(0), sr1: r(0), op2: Operand::Imm(7) },
            Instruction::Jmp { base: Reg::R7 },
        ]);
        let mut console = BufferConsole::new();

        cpu.step(&mut console).unwrap();
        assert_eq!(cpu.regs.read(Reg::R7), 0x3001);
        assert_eq!(cpu.regs.pc, 0x3003);

        let executed = cpu.run(&mut console).unwrap();
        assert_eq!(executed, 3);
        assert_eq!(cpu.regs.read(r(0)), 7);
        assert_eq!(cpu.regs.pc, 0x3002);
    }

    #[test]
    fn test_jsrr() {
        let mut cpu = cpu_with(&[Instruction::Jsrr { base: r(3) }]);
        cpu.regs.write(r(3), 0x4567);

        cpu.step(&mut BufferConsole::new()).unwrap();

        assert_eq!(cpu.regs.read(Reg::R7), 0x3001);
        assert_eq!(cpu.regs.pc, 0x4567);
    }

    #[test]
    fn test_jsrr_through_r7() {
        let mut cpu = cpu_with(&[Instruction::Jsrr { base: Reg::R7 }]);
        cpu.regs.write(Reg::R7, 0x4567);

        cpu.step(&mut BufferConsole::new()).unwrap();

        assert_eq!(cpu.regs.pc, 0x3001);
    }

    #[test]
    fn test_trap_sets_r7() {
        let mut cpu = cpu_with(&[Instruction::Trap { vector: TrapVector::Out }, HALT]);
        cpu.regs.write(r(0), b'!' as u16);
        let mut console = BufferConsole::new();

        cpu.run(&mut console).unwrap();

        assert_eq!(cpu.regs.read(Reg::R7), 0x3002);
        assert_eq!(console.output_string(), "!HALT\n");
    }

    #[test]
    fn test_reserved_opcode_faults() {
        let mut cpu = Cpu::new();
        cpu.mem.write(PC_START, 0xD000);
        cpu.mem.write(PC_START + 1, encode(&HALT));
        let mut console = BufferConsole::new();

        let err = cpu.run(&mut console).unwrap_err();

        assert!(matches!(err, CpuError::Fault { pc: PC_START, word: 0xD000, .. }));
        assert_eq!(cpu.state, CpuState::Faulted);
        assert_eq!(cpu.cycles, 0);
        assert!(console.output().is_empty());
        assert!(matches!(cpu.step(&mut console), Err(CpuError::NotRunning(CpuState::Faulted))));
    }

    #[test]
    fn test_rti_and_bad_trap_fault() {
        for word in [0x8000, 0xF0FF] {
            let mut cpu = Cpu::new();
            cpu.mem.write(PC_START, word);
            assert!(matches!(cpu.step(&mut BufferConsole::new()), Err(CpuError::Fault { .. })));
            assert_eq!(cpu.state, CpuState::Faulted);
        }
    }

    #[test]
    fn test_getc_io_error_propagates() {
        let mut cpu = cpu_with(&[Instruction::Trap { vector: TrapVector::Getc }]);
        assert!(matches!(cpu.step(&mut BufferConsole::new()), Err(CpuError::Io(_))));
    }

    #[test]
    fn test_keyboard_poll_program() {
        // LDI R0, KBSR ; LDI R1, KBDR ; HALT ; .FILL xFE00 ; .FILL xFE02
        let mut cpu = cpu_with(&[
            Instruction::Ldi { dr: r(0), offset: 2 },
            Instruction::Ldi { dr: r(1), offset: 2 },
            HALT,
        ]);
        cpu.mem.write(0x3003, 0xFE00);
        cpu.mem.write(0x3004, 0xFE02);
        let mut console = BufferConsole::with_input(b"A");

        cpu.run(&mut console).unwrap();

        assert_eq!(cpu.regs.read(r(0)), 0x8000);
        assert_eq!(cpu.regs.read(r(1)), 0x41);
    }

    #[test]
    fn test_run_limited() {
        let mut cpu = cpu_with(&[Instruction::Br { nzp: 0b111, offset: 0xFFFF }]);
        let executed = cpu.run_limited(100, &mut BufferConsole::new()).unwrap();
        assert_eq!(executed, 100);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_run_until_cycle_limit_and_cancel() {
        let mut cpu = cpu_with(&[Instruction::Br { nzp: 0b111, offset: 0xFFFF }]);
        let cancel = AtomicBool::new(false);
        let mut console = BufferConsole::new();

        let summary = cpu.run_until(Some(10), &cancel, &mut console).unwrap();
        assert_eq!(summary, RunSummary { executed: 10, reason: StopReason::CycleLimit });

        cancel.store(true, Ordering::SeqCst);
        let summary = cpu.run_until(None, &cancel, &mut console).unwrap();
        assert_eq!(summary, RunSummary { executed: 0, reason: StopReason::Cancelled });
    }

    #[test]
    fn test_run_until_halt() {
        let mut cpu = cpu_with(&[HALT]);
        let cancel = AtomicBool::new(false);

        let summary = cpu.run_until(None, &cancel, &mut BufferConsole::new()).unwrap();
        assert_eq!(summary, RunSummary { executed: 1, reason: StopReason::Halted });
    }

    #[test]
    fn test_run_until_with_sees_each_pc() {
        let mut cpu = cpu_with(&[
            Instruction::Add { dr: r(0), sr1: r(0), op2: Operand::Imm(1) },
            Instruction::Br { nzp: 0b111, offset: 1 },
            HALT,
            HALT,
        ]);
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();

        cpu.run_until_with(None, &cancel, &mut BufferConsole::new(), |cpu| seen.push(cpu.regs.pc))
            .unwrap();

        assert_eq!(seen, vec![0x3000, 0x3001, 0x3003]);
    }

    /// Console whose pump raises `cancel` on its second call.
    struct CancelOnPump<'a> {
        cancel: &'a AtomicBool,
        pumps: u32,
    }

    impl Console for CancelOnPump<'_> {
        fn poll_key(&mut self) -> io::Result<Option<u8>> {
            Ok(None)
        }

        fn read_key(&mut self) -> io::Result<u8> {
            Err(io::ErrorKind::UnexpectedEof.into())
        }

        fn write_byte(&mut self, _byte: u8) -> io::Result<()> {
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn pump(&mut self) -> io::Result<()> {
            self.pumps += 1;
            if self.pumps == 2 {
                self.cancel.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    /// Console whose blocking read is interrupted, optionally raising a
    /// cancel flag first the way the terminal does on Ctrl-C.
    struct InterruptedRead<'a> {
        raise: Option<&'a AtomicBool>,
    }

    impl Console for InterruptedRead<'_> {
        fn poll_key(&mut self) -> io::Result<Option<u8>> {
            Ok(None)
        }

        fn read_key(&mut self) -> io::Result<u8> {
            if let Some(flag) = self.raise {
                flag.store(true, Ordering::SeqCst);
            }
            Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"))
        }

        fn write_byte(&mut self, _byte: u8) -> io::Result<()> {
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_pump_cancels_loop_that_never_reads_keyboard() {
        // BRnzp #-1
        let mut cpu = cpu_with(&[Instruction::Br { nzp: 0b111, offset: 0xFFFF }]);
        let cancel = AtomicBool::new(false);
        let mut console = CancelOnPump { cancel: &cancel, pumps: 0 };

        let summary = cpu.run_until(Some(1_000_000), &cancel, &mut console).unwrap();

        assert_eq!(summary, RunSummary { executed: PUMP_INTERVAL, reason: StopReason::Cancelled });
        assert_eq!(console.pumps, 2);
    }

    #[test]
    fn test_interrupted_read_with_cancel_is_cancelled() {
        let mut cpu = cpu_with(&[Instruction::Trap { vector: TrapVector::Getc }]);
        let cancel = AtomicBool::new(false);
        let mut console = InterruptedRead { raise: Some(&cancel) };

        let summary = cpu.run_until(None, &cancel, &mut console).unwrap();

        assert_eq!(summary, RunSummary { executed: 0, reason: StopReason::Cancelled });
        assert!(cpu.is_running());
    }

    #[test]
    fn test_interrupted_read_without_cancel_is_error() {
        let mut cpu = cpu_with(&[Instruction::Trap { vector: TrapVector::Getc }]);
        let cancel = AtomicBool::new(false);
        let mut console = InterruptedRead { raise: None };

        let err = cpu.run_until(None, &cancel, &mut console).unwrap_err();

        assert!(matches!(err, CpuError::Io(ref e) if e.kind() == io::ErrorKind::Interrupted));
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut cpu = cpu_with(&[HALT]);
        cpu.run(&mut BufferConsole::new()).unwrap();

        let json = serde_json::to_string(&cpu.snapshot()).unwrap();
        assert!(json.contains("\"Halted\""));
        assert!(json.contains("\"cycles\":1"));
    }

    proptest! {
        #[test]
        fn prop_add_and_immediate_matches_register(
            a in any::<u16>(),
            imm in 0u16..32,
            is_and in any::<bool>(),
        ) {
            let op2 = crate::cpu::decode::sign_extend(imm, 5);
            let make = |op2| if is_and {
                Instruction::And { dr: r(2), sr1: r(1), op2 }
            } else {
                Instruction::Add { dr: r(2), sr1: r(1), op2 }
            };

            let mut imm_cpu = cpu_with(&[make(Operand::Imm(op2))]);
            imm_cpu.regs.write(r(1), a);
            imm_cpu.step(&mut BufferConsole::new()).unwrap();

            let mut reg_cpu = cpu_with(&[make(Operand::Reg(r(3)))]);
            reg_cpu.regs.write(r(1), a);
            reg_cpu.regs.write(r(3), op2);
            reg_cpu.step(&mut BufferConsole::new()).unwrap();

            prop_assert_eq!(imm_cpu.regs.read(r(2)), reg_cpu.regs.read(r(2)));
            prop_assert_eq!(imm_cpu.regs.flags(), reg_cpu.regs.flags());
        }

        #[test]
        fn prop_register_writes_leave_one_flag(
            // Opcodes that write a register and never fault or trap.
            op in prop::sample::select(vec![0x1u16, 0x2, 0x5, 0x6, 0x9, 0xA, 0xE]),
            fields in 0u16..0x1000,
            init in any::<[u16; 8]>(),
            mem_value in any::<u16>(),
        ) {
            let word = op << 12 | fields;

            let mut cpu = Cpu::new();
            for (i, v) in init.iter().enumerate() {
                cpu.regs.write(r(i as u16), *v);
            }
            cpu.mem.write(PC_START, word);
            // Make every reachable load return a known value except the instruction itself.
            for addr in [0x3001u16.wrapping_add(decode::sign_extend(word, 9)), mem_value] {
                if addr != PC_START && addr != crate::cpu::KBSR {
                    cpu.mem.write(addr, mem_value);
                }
            }

            cpu.step(&mut BufferConsole::new()).unwrap();
            let dr = r(word >> 9);
            assert_one_hot(&cpu, cpu.regs.read(dr));
        }
    }
}
